//! Batching: the next range of work after a cursor.
//!
//! Positions are counted in the source's native addressing: bytes for plain
//! text, pages for paged documents, a single position for an image. The
//! cursor is the number of positions completed, so a batch covers the
//! half-open span `(cursor, end]` and its units start at `cursor`,
//! `cursor + stride`, … For pages (stride 1) the units of `(2, 4]` are the
//! 0-based page indices 2 and 3, i.e. pages 3 and 4.

/// A contiguous span of positions dispatched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    /// Cursor before the batch (exclusive lower bound).
    pub start: u64,
    /// Cursor after the batch commits (inclusive upper bound).
    pub end: u64,
    /// Distance between unit indices.
    pub stride: u64,
}

impl BatchRange {
    /// Unit indices covered by this range, in order.
    pub fn units(&self) -> impl Iterator<Item = u64> {
        (self.start..self.end).step_by(self.stride.max(1) as usize)
    }

    /// Number of units in the range.
    pub fn len(&self) -> u64 {
        (self.end - self.start).div_ceil(self.stride.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// 1-based inclusive bounds `[first, last]` for display.
    pub fn display_bounds(&self) -> (u64, u64) {
        (self.start + 1, self.end)
    }
}

/// Compute the next batch after `cursor`.
///
/// Pure. Returns `None` only when `cursor >= total`; otherwise the range
/// holds between 1 and `batch_size` units and never extends past `total`.
pub fn next_range(cursor: u64, total: u64, batch_size: usize, stride: u64) -> Option<BatchRange> {
    if cursor >= total {
        return None;
    }
    let stride = stride.max(1);
    let span = (batch_size.max(1) as u64).saturating_mul(stride);
    Some(BatchRange {
        start: cursor,
        end: cursor.saturating_add(span).min(total),
        stride,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_ranges(cursor: u64, total: u64, batch: usize, stride: u64) -> Vec<BatchRange> {
        let mut out = Vec::new();
        let mut cursor = cursor;
        while let Some(r) = next_range(cursor, total, batch, stride) {
            cursor = r.end;
            out.push(r);
        }
        out
    }

    #[test]
    fn covers_every_index_once_in_order() {
        for total in 0..40u64 {
            for batch in 1..=10usize {
                let ranges = all_ranges(0, total, batch, 1);
                let covered: Vec<u64> = ranges.iter().flat_map(|r| r.units()).collect();
                assert_eq!(covered, (0..total).collect::<Vec<_>>(), "T={total} B={batch}");
                assert!(ranges.iter().all(|r| r.len() as usize <= batch && !r.is_empty()));
            }
        }
    }

    #[test]
    fn text_chunks_of_100kb() {
        let ranges = all_ranges(0, 102_400, 1, 32_768);
        let ends: Vec<u64> = ranges.iter().map(|r| r.end).collect();
        assert_eq!(ends, vec![32_768, 65_536, 98_304, 102_400]);
        let sizes: Vec<u64> = ranges.iter().map(|r| r.end - r.start).collect();
        assert_eq!(sizes, vec![32_768, 32_768, 32_768, 4_096]);
    }

    #[test]
    fn page_range_three_to_seven() {
        let ranges = all_ranges(2, 7, 2, 1);
        let pages: Vec<Vec<u64>> = ranges
            .iter()
            .map(|r| r.units().map(|i| i + 1).collect())
            .collect();
        assert_eq!(pages, vec![vec![3, 4], vec![5, 6], vec![7]]);
        assert_eq!(ranges[0].display_bounds(), (3, 4));
    }

    #[test]
    fn exhausted_cursor_yields_none() {
        assert_eq!(next_range(7, 7, 3, 1), None);
        assert_eq!(next_range(9, 7, 3, 1), None);
    }

    #[test]
    fn multi_chunk_text_batch() {
        let r = next_range(0, 100, 3, 32).unwrap();
        assert_eq!(r.units().collect::<Vec<_>>(), vec![0, 32, 64]);
        assert_eq!(r.end, 96);
        let r = next_range(96, 100, 3, 32).unwrap();
        assert_eq!(r.units().collect::<Vec<_>>(), vec![96]);
        assert_eq!(r.len(), 1);
    }
}
