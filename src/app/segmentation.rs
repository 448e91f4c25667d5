//! Segmentation of large service payloads (clause 5.2).
//!
//! A message too large for the peer's maximum APDU is split into up to 256
//! segments. The sender transmits segment 0 alone; every following window
//! holds at most the window size the receiver acknowledged with.

use alloc::{collections::BTreeMap, vec::Vec};
use core::ops::Range;

use bytes::{Bytes, BytesMut};

use super::SegmentHeader;

/// Sequence numbers are 8 bits wide.
pub const MAX_SEGMENTS: usize = 256;

/// Window sizes are limited to 1..=127.
pub const MAX_WINDOW_SIZE: u8 = 127;

/// Split `data` into chunks of at most `max_segment_size` octets. An empty
/// payload still produces one (empty) segment.
pub fn split_segments(data: &Bytes, max_segment_size: usize) -> Vec<Bytes> {
    let size = max_segment_size.max(1);
    if data.is_empty() {
        return alloc::vec![Bytes::new()];
    }
    (0..data.len().div_ceil(size))
        .map(|i| data.slice(i * size..((i + 1) * size).min(data.len())))
        .collect()
}

/// Clamp a window size to the legal range.
pub fn clamp_window(window_size: u8) -> u8 {
    window_size.clamp(1, MAX_WINDOW_SIZE)
}

/// What the receiver should do after [`SegmentReassembly::accept`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentVerdict {
    /// Buffered, the window is still open.
    Pending,
    /// The window is complete: acknowledge `sequence_number`.
    WindowComplete { sequence_number: u8 },
    /// Already applied; acknowledge again without applying.
    Duplicate { sequence_number: u8 },
    /// Outside the current window; answer with a negative acknowledgement of
    /// the last in-order segment, if there is one.
    OutOfWindow { last_in_order: Option<u8> },
    /// More than [`MAX_SEGMENTS`] segments announced.
    TooManySegments,
    /// Every segment arrived; the final one was `sequence_number`.
    Complete { sequence_number: u8, data: Bytes },
}

/// Receive side of a segmented message.
///
/// Segments inside the current window are buffered in any order and applied
/// once contiguous. Positions are tracked as `u16` so sequence number 255
/// does not wrap.
#[derive(Debug, Clone)]
pub struct SegmentReassembly {
    out_of_order: BTreeMap<u16, Bytes>,
    applied: Vec<Bytes>,
    next_expected: u16,
    window_start: u16,
    window_size: u8,
    actual_window_size: u8,
    last_sequence: Option<u16>,
}

impl SegmentReassembly {
    /// `proposed_window_size` is the sender's proposal, `local_window_size`
    /// the most this side accepts.
    pub fn new(proposed_window_size: u8, local_window_size: u8) -> Self {
        Self {
            out_of_order: BTreeMap::new(),
            applied: Vec::new(),
            next_expected: 0,
            window_start: 0,
            window_size: 1,
            actual_window_size: clamp_window(proposed_window_size.min(local_window_size)),
            last_sequence: None,
        }
    }

    /// Window size announced in this side's Segment-ACKs.
    pub fn actual_window_size(&self) -> u8 {
        self.actual_window_size
    }

    /// Number of segments applied so far.
    pub fn applied_segments(&self) -> usize {
        self.applied.len()
    }

    pub fn last_in_order(&self) -> Option<u8> {
        self.next_expected.checked_sub(1).map(|seq| seq as u8)
    }

    pub fn accept(
        &mut self,
        sequence_number: u8,
        more_follows: bool,
        data: Bytes,
    ) -> SegmentVerdict {
        let seq = u16::from(sequence_number);

        if seq < self.next_expected {
            return SegmentVerdict::Duplicate { sequence_number: (self.next_expected - 1) as u8 };
        }

        let window_end = self.window_start + u16::from(self.window_size);
        let past_end = self.last_sequence.is_some_and(|last| seq > last);
        if seq >= window_end || past_end {
            return SegmentVerdict::OutOfWindow {
                last_in_order: self.last_in_order(),
            };
        }

        if !more_follows {
            self.last_sequence = Some(seq);
            self.out_of_order.retain(|&position, _| position < seq);
        } else if usize::from(seq) + 1 == MAX_SEGMENTS {
            return SegmentVerdict::TooManySegments;
        }
        self.out_of_order.entry(seq).or_insert(data);

        while let Some(segment) = self.out_of_order.remove(&self.next_expected) {
            self.applied.push(segment);
            self.next_expected += 1;
        }

        if let Some(last) = self.last_sequence {
            if self.next_expected == last + 1 {
                return SegmentVerdict::Complete {
                    sequence_number: last as u8,
                    data: self.assemble(),
                };
            }
        }

        if self.next_expected == window_end {
            self.window_start = window_end;
            self.window_size = self.actual_window_size;
            return SegmentVerdict::WindowComplete {
                sequence_number: (window_end - 1) as u8,
            };
        }

        SegmentVerdict::Pending
    }

    fn assemble(&mut self) -> Bytes {
        let total = self.applied.iter().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for segment in self.applied.drain(..) {
            data.extend_from_slice(&segment);
        }
        data.freeze()
    }
}

/// Result of applying a Segment-ACK to a [`SegmentWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAdvance {
    /// The next window is ready to send.
    Advanced,
    /// The receiver holds every segment.
    Finished,
    /// The acknowledgement does not refer to the current window.
    Ignored,
}

/// Send side of a segmented message.
#[derive(Debug, Clone)]
pub struct SegmentWindow {
    segments: Vec<Bytes>,
    proposed_window_size: u8,
    window_start: usize,
    window_size: u8,
}

impl SegmentWindow {
    pub fn new(segments: Vec<Bytes>, proposed_window_size: u8) -> Self {
        Self {
            segments,
            proposed_window_size: clamp_window(proposed_window_size),
            window_start: 0,
            window_size: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True once segment 0 has been acknowledged.
    pub fn started(&self) -> bool {
        self.window_start > 0
    }

    /// Indices of the segments in the current window.
    pub fn current(&self) -> Range<usize> {
        let end = (self.window_start + usize::from(self.window_size)).min(self.segments.len());
        self.window_start..end
    }

    /// Segment `index` with its segmentation header.
    pub fn segment(&self, index: usize) -> Option<(SegmentHeader, Bytes)> {
        let data = self.segments.get(index)?.clone();
        let header = SegmentHeader {
            sequence_number: index as u8,
            proposed_window_size: self.proposed_window_size,
            more_follows: index + 1 < self.segments.len(),
        };
        Some((header, data))
    }

    /// Start over from segment 0 for a full retransmission.
    pub fn rewind(&mut self) {
        self.window_start = 0;
        self.window_size = 1;
    }

    /// Apply a (possibly negative) Segment-ACK. Both kinds mean "everything
    /// up to `sequence_number` arrived"; the next window starts after it.
    pub fn acknowledge(&mut self, sequence_number: u8, actual_window_size: u8) -> WindowAdvance {
        let acked = usize::from(sequence_number);
        let window = self.current();
        if acked + 1 < window.start || acked >= window.end {
            return WindowAdvance::Ignored;
        }
        if acked + 1 >= self.segments.len() {
            return WindowAdvance::Finished;
        }
        self.window_start = acked + 1;
        self.window_size = clamp_window(actual_window_size);
        WindowAdvance::Advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| i as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_split_segments() {
        let data = payload(10);
        let segments = split_segments(&data, 4);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].as_ref(), &[8, 9]);
        assert_eq!(split_segments(&Bytes::new(), 4), vec![Bytes::new()]);
        assert_eq!(split_segments(&payload(8), 4).len(), 2);
    }

    fn feed(
        reassembly: &mut SegmentReassembly,
        segments: &[Bytes],
        order: &[usize],
    ) -> Vec<SegmentVerdict> {
        order
            .iter()
            .map(|&i| reassembly.accept(i as u8, i + 1 < segments.len(), segments[i].clone()))
            .collect()
    }

    #[test]
    fn test_in_order_reassembly() {
        let data = payload(100);
        let segments = split_segments(&data, 10);
        let mut reassembly = SegmentReassembly::new(4, 8);
        assert_eq!(reassembly.actual_window_size(), 4);

        let verdicts = feed(&mut reassembly, &segments, &[0]);
        assert_eq!(verdicts, vec![SegmentVerdict::WindowComplete { sequence_number: 0 }]);

        let verdicts = feed(&mut reassembly, &segments, &[1, 2, 3, 4]);
        assert_eq!(verdicts[3], SegmentVerdict::WindowComplete { sequence_number: 4 });

        let verdicts = feed(&mut reassembly, &segments, &[5, 6, 7, 8, 9]);
        assert_eq!(
            verdicts[4],
            SegmentVerdict::Complete {
                sequence_number: 9,
                data
            }
        );
    }

    #[test]
    fn test_out_of_order_within_window() {
        let data = payload(50);
        let segments = split_segments(&data, 10);
        let permutations: [[usize; 4]; 4] =
            [[4, 3, 2, 1], [2, 4, 1, 3], [1, 3, 4, 2], [3, 1, 2, 4]];

        for order in permutations {
            let mut reassembly = SegmentReassembly::new(4, 4);
            feed(&mut reassembly, &segments, &[0]);
            let verdicts = feed(&mut reassembly, &segments, &order);
            assert_eq!(
                verdicts.last(),
                Some(&SegmentVerdict::Complete {
                    sequence_number: 4,
                    data: data.clone()
                }),
                "order {order:?}"
            );
            assert!(verdicts[..3].iter().all(|v| *v == SegmentVerdict::Pending));
        }
    }

    #[test]
    fn test_duplicate_is_reacknowledged_not_reapplied() {
        let data = payload(30);
        let segments = split_segments(&data, 10);
        let mut reassembly = SegmentReassembly::new(2, 2);
        feed(&mut reassembly, &segments, &[0]);
        assert_eq!(
            feed(&mut reassembly, &segments, &[0]),
            vec![SegmentVerdict::Duplicate { sequence_number: 0 }]
        );
        assert_eq!(reassembly.applied_segments(), 1);
        let verdicts = feed(&mut reassembly, &segments, &[1, 1, 2]);
        assert_eq!(verdicts[1], SegmentVerdict::Duplicate { sequence_number: 1 });
        assert!(matches!(
            verdicts[2],
            SegmentVerdict::Complete { ref data, .. } if data.len() == 30
        ));
    }

    #[test]
    fn test_out_of_window_segment() {
        let segments = split_segments(&payload(100), 10);
        let mut reassembly = SegmentReassembly::new(2, 2);
        assert_eq!(
            feed(&mut reassembly, &segments, &[1]),
            vec![SegmentVerdict::OutOfWindow { last_in_order: None }]
        );
        feed(&mut reassembly, &segments, &[0]);
        assert_eq!(
            feed(&mut reassembly, &segments, &[3]),
            vec![SegmentVerdict::OutOfWindow {
                last_in_order: Some(0)
            }]
        );
    }

    #[test]
    fn test_too_many_segments() {
        let mut reassembly = SegmentReassembly::new(127, 127);
        reassembly.accept(0, true, Bytes::from_static(b"x"));
        for seq in 1..=127u8 {
            reassembly.accept(seq, true, Bytes::from_static(b"x"));
        }
        for seq in 128..=254u8 {
            reassembly.accept(seq, true, Bytes::from_static(b"x"));
        }
        assert_eq!(
            reassembly.accept(255, true, Bytes::from_static(b"x")),
            SegmentVerdict::TooManySegments
        );
        assert!(matches!(
            reassembly.accept(255, false, Bytes::from_static(b"x")),
            SegmentVerdict::Complete { sequence_number: 255, ref data } if data.len() == 256
        ));
    }

    #[test]
    fn test_send_window_progress() {
        let mut window = SegmentWindow::new(split_segments(&payload(70), 10), 3);
        assert_eq!(window.len(), 7);
        assert_eq!(window.current(), 0..1);
        assert!(!window.started());

        assert_eq!(window.acknowledge(0, 3), WindowAdvance::Advanced);
        assert_eq!(window.current(), 1..4);
        assert_eq!(window.acknowledge(9, 3), WindowAdvance::Ignored);

        // negative ack: only segment 1 arrived
        assert_eq!(window.acknowledge(1, 3), WindowAdvance::Advanced);
        assert_eq!(window.current(), 2..5);
        assert_eq!(window.acknowledge(4, 5), WindowAdvance::Advanced);
        assert_eq!(window.current(), 5..7);

        let (header, _) = window.segment(6).unwrap();
        assert!(!header.more_follows);
        assert_eq!(header.proposed_window_size, 3);
        assert_eq!(window.acknowledge(6, 5), WindowAdvance::Finished);

        window.rewind();
        assert_eq!(window.current(), 0..1);
    }

    #[test]
    fn test_sender_and_receiver_agree() {
        let data = payload(1000);
        let mut window = SegmentWindow::new(split_segments(&data, 64), 4);
        let mut reassembly = SegmentReassembly::new(4, 3);

        let mut result = None;
        while result.is_none() {
            let mut ack = None;
            for index in window.current() {
                let (header, segment) = window.segment(index).unwrap();
                match reassembly.accept(header.sequence_number, header.more_follows, segment) {
                    SegmentVerdict::WindowComplete { sequence_number } => {
                        ack = Some(sequence_number)
                    }
                    SegmentVerdict::Complete { data, .. } => result = Some(data),
                    SegmentVerdict::Pending => {}
                    other => panic!("unexpected {other:?}"),
                }
            }
            if let Some(seq) = ack {
                window.acknowledge(seq, reassembly.actual_window_size());
            }
        }
        assert_eq!(result, Some(data));
    }
}
