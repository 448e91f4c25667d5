//! Invoke ID allocation.

/// Hands out invoke IDs for one peer.
///
/// IDs are issued round robin; an ID still outstanding is skipped, so reuse
/// only happens once the earlier exchange has terminated.
#[derive(Debug, Clone, Default)]
pub struct InvokeIdAllocator {
    next: u8,
}

impl InvokeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start probing at `next`.
    pub fn starting_at(next: u8) -> Self {
        Self { next }
    }

    /// The next ID for which `in_use` is false, or `None` when all 256 are
    /// outstanding.
    pub fn allocate(&mut self, in_use: impl Fn(u8) -> bool) -> Option<u8> {
        let start = self.next;
        for offset in 0..=u8::MAX {
            let candidate = start.wrapping_add(offset);
            if !in_use(candidate) {
                self.next = candidate.wrapping_add(1);
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequential_allocation() {
        let mut allocator = InvokeIdAllocator::new();
        assert_eq!(allocator.allocate(|_| false), Some(0));
        assert_eq!(allocator.allocate(|_| false), Some(1));
        assert_eq!(allocator.allocate(|_| false), Some(2));
    }

    #[test]
    fn test_skips_outstanding_ids() {
        let outstanding: HashSet<u8> = [5, 6].into_iter().collect();
        let mut allocator = InvokeIdAllocator::starting_at(5);
        assert_eq!(allocator.allocate(|id| outstanding.contains(&id)), Some(7));
    }

    #[test]
    fn test_wraps_around() {
        let mut allocator = InvokeIdAllocator::starting_at(255);
        assert_eq!(allocator.allocate(|_| false), Some(255));
        assert_eq!(allocator.allocate(|_| false), Some(0));
        assert_eq!(allocator.allocate(|id| id == 1), Some(2));
    }

    #[test]
    fn test_reuse_after_completion() {
        let mut outstanding = HashSet::new();
        let mut allocator = InvokeIdAllocator::new();
        for _ in 0..256 {
            let id = allocator.allocate(|id| outstanding.contains(&id)).unwrap();
            outstanding.insert(id);
        }
        assert_eq!(allocator.allocate(|id| outstanding.contains(&id)), None);

        outstanding.remove(&42);
        assert_eq!(allocator.allocate(|id| outstanding.contains(&id)), Some(42));
    }
}
