use alloc::vec::Vec;

use super::{decode_tag, ApplicationTag, Decodable, EncodingError, Result, Tag};

/// Cursor over an encoded buffer.
///
/// A tag is only handed out when its declared content fits in the remaining
/// octets, so a corrupt length never turns into a short read. The position
/// can be saved with [`Reader::position`] and rewound with
/// [`Reader::restore`] to look ahead at optional members.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Rewind (or advance) to a position previously returned by
    /// [`Reader::position`].
    pub fn restore(&mut self, position: usize) {
        self.position = position.min(self.data.len());
    }

    /// Everything not consumed yet.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.position)
            .ok_or(EncodingError::UnexpectedEndOfData {
                needed: 1,
                remaining: 0,
            })?;
        self.position += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(EncodingError::UnexpectedEndOfData {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + n];
        self.position += n;
        Ok(bytes)
    }

    /// Decode the next tag header without consuming it. `None` at end of data.
    pub fn peek_tag(&self) -> Result<Option<Tag>> {
        if self.is_empty() {
            return Ok(None);
        }
        decode_tag(self.rest()).map(|(tag, _)| Some(tag))
    }

    /// Consume the next tag header, checking that its content is present.
    pub fn read_tag(&mut self) -> Result<Tag> {
        let (tag, consumed) = decode_tag(self.rest())?;
        let remaining = self.remaining() - consumed;
        if tag.content_length() > remaining {
            return Err(EncodingError::LengthExceedsBuffer {
                length: tag.content_length(),
                remaining,
            });
        }
        self.position += consumed;
        Ok(tag)
    }

    /// Consume an application tag of the given type and return its content.
    pub fn read_application(&mut self, expected: ApplicationTag) -> Result<&'a [u8]> {
        let start = self.position;
        let tag = self.read_tag()?;
        match tag {
            Tag::Application { number, .. } if number == expected as u8 => {
                self.read_bytes(tag.content_length())
            }
            found => {
                self.position = start;
                Err(EncodingError::ExpectedApplicationTag { expected, found })
            }
        }
    }

    /// Consume context tag `tag_number` and return its content.
    pub fn read_context(&mut self, tag_number: u8) -> Result<&'a [u8]> {
        let found = self.peek_tag()?;
        match found {
            Some(Tag::Context { number, .. }) if number == tag_number => {
                let tag = self.read_tag()?;
                self.read_bytes(tag.content_length())
            }
            found => Err(EncodingError::ExpectedContextTag {
                expected: tag_number,
                found,
            }),
        }
    }

    pub fn expect_opening(&mut self, tag_number: u8) -> Result<()> {
        match self.peek_tag()? {
            Some(tag) if tag.is_opening(tag_number) => {
                self.read_tag()?;
                Ok(())
            }
            found => Err(EncodingError::ExpectedOpeningTag {
                expected: tag_number,
                found,
            }),
        }
    }

    pub fn expect_closing(&mut self, tag_number: u8) -> Result<()> {
        match self.peek_tag()? {
            Some(tag) if tag.is_closing(tag_number) => {
                self.read_tag()?;
                Ok(())
            }
            found => Err(EncodingError::ExpectedClosingTag {
                expected: tag_number,
                found,
            }),
        }
    }

    /// True when the next tag is context tag `tag_number`, primitive or
    /// opening.
    pub fn next_is_context(&self, tag_number: u8) -> bool {
        matches!(
            self.peek_tag(),
            Ok(Some(tag)) if tag.is_context(tag_number) || tag.is_opening(tag_number)
        )
    }

    pub fn next_is_closing(&self, tag_number: u8) -> bool {
        matches!(self.peek_tag(), Ok(Some(tag)) if tag.is_closing(tag_number))
    }

    /// Decode an optional member: absent when the next tag is not context
    /// tag `tag_number`.
    pub fn read_optional<T: Decodable>(&mut self, tag_number: u8) -> Result<Option<T>> {
        if self.next_is_context(tag_number) {
            T::decode_context(tag_number, self).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Skip one complete element: a primitive tag with its content or a whole
    /// opening..closing block.
    pub fn skip_element(&mut self) -> Result<()> {
        match self.read_tag()? {
            Tag::Opening(number) => {
                while !self.next_is_closing(number) {
                    if self.is_empty() {
                        return Err(EncodingError::ExpectedClosingTag {
                            expected: number,
                            found: None,
                        });
                    }
                    self.skip_element()?;
                }
                self.read_tag()?;
                Ok(())
            }
            Tag::Closing(number) => Err(EncodingError::InvalidFormat(alloc::format!(
                "unbalanced closing tag {}",
                number
            ))),
            tag => self.read_bytes(tag.content_length()).map(|_| ()),
        }
    }

    /// Consume `opening(tag_number) ... closing(tag_number)` and return the
    /// raw octets between the two tags.
    pub fn read_enclosed(&mut self, tag_number: u8) -> Result<&'a [u8]> {
        self.expect_opening(tag_number)?;
        let start = self.position;
        while !self.next_is_closing(tag_number) {
            if self.is_empty() {
                return Err(EncodingError::ExpectedClosingTag {
                    expected: tag_number,
                    found: None,
                });
            }
            self.skip_element()?;
        }
        let inner = &self.data[start..self.position];
        self.expect_closing(tag_number)?;
        Ok(inner)
    }

    /// Decode application or constructed elements until `closing` (when
    /// nested) or the end of the buffer (at top level). The closing tag is
    /// left in place.
    pub fn read_sequence_of<T: Decodable>(&mut self, closing: Option<u8>) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            match closing {
                Some(number) if self.next_is_closing(number) => break,
                Some(number) if self.is_empty() => {
                    return Err(EncodingError::ExpectedClosingTag {
                        expected: number,
                        found: None,
                    })
                }
                None if self.is_empty() => break,
                _ => items.push(T::decode(self)?),
            }
        }
        Ok(items)
    }

    /// `[tag_number] SEQUENCE OF T`.
    pub fn read_context_sequence_of<T: Decodable>(&mut self, tag_number: u8) -> Result<Vec<T>> {
        self.expect_opening(tag_number)?;
        let items = self.read_sequence_of(Some(tag_number))?;
        self.expect_closing(tag_number)?;
        Ok(items)
    }

    /// Fail unless every octet has been consumed.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(EncodingError::TrailingData { remaining }),
        }
    }

    /// Exactly `len` elements of a fixed-size array.
    pub fn read_array<T: Decodable>(&mut self, len: usize) -> Result<Vec<T>> {
        (0..len).map(|_| T::decode(self)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{encode_closing_tag, encode_opening_tag, Encodable};
    use alloc::vec;

    #[test]
    fn test_declared_length_beyond_buffer_is_rejected() {
        // octet string claiming 10 bytes with only 3 present
        let data = [0x65, 0x0A, 1, 2, 3];
        let mut reader = Reader::new(&data);
        assert_eq!(
            reader.read_tag(),
            Err(EncodingError::LengthExceedsBuffer {
                length: 10,
                remaining: 3
            })
        );
        assert_eq!(reader.position(), 0);
        assert!(Vec::<u8>::decode(&mut reader).is_err());
    }

    #[test]
    fn test_restore_after_lookahead() {
        let mut buffer = Vec::new();
        7u32.encode_context(2, &mut buffer).unwrap();
        let mut reader = Reader::new(&buffer);

        let mark = reader.position();
        assert!(u32::decode_context(1, &mut reader).is_err());
        reader.restore(mark);
        assert_eq!(reader.read_optional::<u32>(1).unwrap(), None);
        assert_eq!(reader.read_optional::<u32>(2).unwrap(), Some(7));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_enclosed_nested() {
        let mut buffer = Vec::new();
        encode_opening_tag(&mut buffer, 3);
        encode_opening_tag(&mut buffer, 3);
        1u32.encode(&mut buffer).unwrap();
        encode_closing_tag(&mut buffer, 3);
        encode_closing_tag(&mut buffer, 3);
        true.encode(&mut buffer).unwrap();

        let mut reader = Reader::new(&buffer);
        let inner = reader.read_enclosed(3).unwrap();
        assert_eq!(inner, &[0x3E, 0x21, 0x01, 0x3F]);
        assert!(bool::decode(&mut reader).unwrap());
    }

    #[test]
    fn test_unterminated_sequence_fails() {
        let mut buffer = Vec::new();
        encode_opening_tag(&mut buffer, 1);
        1u32.encode(&mut buffer).unwrap();
        let mut reader = Reader::new(&buffer);
        assert!(reader.read_context_sequence_of::<u32>(1).is_err());
        assert!(Reader::new(&buffer).read_enclosed(1).is_err());
    }

    #[test]
    fn test_sequence_of_at_top_level() {
        let mut buffer = Vec::new();
        for value in [1u32, 300, 70000] {
            value.encode(&mut buffer).unwrap();
        }
        let mut reader = Reader::new(&buffer);
        let values: Vec<u32> = reader.read_sequence_of(None).unwrap();
        assert_eq!(values, vec![1, 300, 70000]);

        let mut reader = Reader::new(&[]);
        assert!(reader.read_sequence_of::<u32>(None).unwrap().is_empty());
    }

    #[test]
    fn test_read_array_requires_all_elements() {
        let mut buffer = Vec::new();
        1u32.encode(&mut buffer).unwrap();
        2u32.encode(&mut buffer).unwrap();
        assert_eq!(
            Reader::new(&buffer).read_array::<u32>(2).unwrap(),
            vec![1, 2]
        );
        assert!(Reader::new(&buffer).read_array::<u32>(3).is_err());
    }
}
