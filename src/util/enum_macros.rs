/// Generates a forward-compatible enumeration for a BACnet enumerated type.
///
/// Standard values get a named variant. Values inside `$custom_range` that are
/// not named decode to `Custom`, every other unnamed value to `Reserved`, so a
/// decoder never fails on an integer it does not know.
///
/// # Example
///
/// ```rust
/// use bacnet_stack::generate_custom_enum;
///
/// generate_custom_enum! {
///     /// Fan modes
///     FanMode {
///         Off = 0,
///         Low = 1,
///         High = 2,
///     },
///     u16,
///     64..=65535
/// }
///
/// assert_eq!(FanMode::from(1u16), FanMode::Low);
/// assert_eq!(u16::from(FanMode::High), 2);
/// assert_eq!(format!("{}", FanMode::Off), "Off");
///
/// match FanMode::from(300u16) {
///     FanMode::Custom(value) => assert_eq!(value.value(), 300),
///     other => panic!("unexpected {other:?}"),
/// }
/// match FanMode::from(9u16) {
///     FanMode::Reserved(value) => assert_eq!(value.value(), 9),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
///
/// Besides the enum and its `[<Name>Value]` payload type the macro emits
/// `Display`, `From<Name> for unit` and `From<unit> for Name`.
#[macro_export]
macro_rules! generate_custom_enum {
    (
        $(#[$doc:meta])* $name:ident { $($variant:ident = $value:literal,)+ },
        $unit:ident,
        $custom_range:expr
    ) => {
        $crate::__private::pastey::paste! {
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            pub enum $name {
                $($variant,)*
                Custom( [<$name Value>] ),
                Reserved( [<$name Value>] ),
            }

            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            pub struct [<$name Value>] { value: $unit }

            impl [<$name Value>] {
                fn new(value: $unit) -> Self {
                    Self { value }
                }

                pub fn value(&self) -> $unit {
                    self.value
                }
            }

            impl $name {
                /// True for values with a named variant.
                pub fn is_standard(&self) -> bool {
                    !matches!(self, $name::Custom(_) | $name::Reserved(_))
                }
            }

            impl core::fmt::Display for $name {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $($name::$variant => write!(f, "{}", stringify!($variant)),)*
                        $name::Custom( value ) => write!(f, "Custom({})", value.value()),
                        $name::Reserved( value ) => write!(f, "Reserved({})", value.value()),
                    }
                }
            }

            impl From<$name> for $unit {
                fn from(value: $name) -> Self {
                    match value {
                        $($name::$variant => $value,)*
                        $name::Custom( value ) => value.value(),
                        $name::Reserved( value ) => value.value(),
                    }
                }
            }

            impl From<$unit> for $name {
                #[allow(clippy::reversed_empty_ranges)]
                fn from(value: $unit) -> Self {
                    match value {
                        $($value => $name::$variant,)*
                        v if ($custom_range).contains(&v) => {
                            $name::Custom( [<$name Value>]::new(v) )
                        }
                        v => $name::Reserved( [<$name Value>]::new(v) ),
                    }
                }
            }
        }
    };
}
