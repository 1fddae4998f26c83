//! Segment planning: splitting a resource into contiguous byte ranges.
//!
//! Boundaries depend only on `(total_size, worker_count)`. A resumed transfer
//! must therefore plan with the worker count stored in its resume record, not
//! the count the caller asks for now.

use super::probe::ProbeResult;

/// One contiguous byte range of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Position in merge order.
    pub index: usize,
    /// Absolute offset of the first byte.
    pub start: u64,
    /// Planned length; `None` for a single stream of unknown length.
    pub len: Option<u64>,
}

impl Segment {
    /// Inclusive absolute offset of the last byte, when the length is known
    /// and non-zero.
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.len
            .filter(|len| *len > 0)
            .map(|len| self.start + len - 1)
    }

    /// Whether `downloaded` bytes cover the whole segment.
    ///
    /// Segments of unknown length are never complete by count alone.
    #[must_use]
    pub fn is_complete(&self, downloaded: u64) -> bool {
        self.len.is_some_and(|len| downloaded >= len)
    }

    /// Bytes still missing, when the length is known.
    #[must_use]
    pub fn remaining(&self, downloaded: u64) -> Option<u64> {
        self.len.map(|len| len.saturating_sub(downloaded))
    }

    /// The `Range` header for continuing this segment after `downloaded` bytes.
    ///
    /// Ranged segments always send a closed range. A single stream sends an
    /// open-ended range only when continuing from a non-zero offset.
    #[must_use]
    pub fn range_header(&self, downloaded: u64, ranged: bool) -> Option<String> {
        if ranged {
            let end = self.end()?;
            let from = self.start + downloaded;
            (from <= end).then(|| format!("bytes={from}-{end}"))
        } else {
            (downloaded > 0).then(|| format!("bytes={downloaded}-"))
        }
    }
}

/// Clamps a requested worker count so no planned segment is empty.
#[must_use]
pub fn effective_worker_count(total_size: u64, requested: usize) -> usize {
    let max_useful = usize::try_from(total_size).unwrap_or(usize::MAX).max(1);
    requested.clamp(1, max_useful)
}

/// Divides `total_size` bytes into `worker_count` contiguous segments.
///
/// Every segment but the last gets `total_size / worker_count` bytes; the last
/// absorbs the remainder, so the sizes always sum to `total_size`. The worker
/// count is clamped by [`effective_worker_count`] first.
#[must_use]
pub fn plan_segments(total_size: u64, worker_count: usize) -> Vec<Segment> {
    let count = effective_worker_count(total_size, worker_count);
    let count_u64 = count as u64;
    let chunk = total_size / count_u64;

    (0..count)
        .map(|index| {
            let start = index as u64 * chunk;
            let len = if index + 1 == count {
                total_size - chunk * (count_u64 - 1)
            } else {
                chunk
            };
            Segment {
                index,
                start,
                len: Some(len),
            }
        })
        .collect()
}

/// Everything the supervisor needs to run one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Total size, when known.
    pub total_size: Option<u64>,
    /// Whether segments use closed byte ranges.
    pub accepts_ranges: bool,
    /// Worker count used for this run (the number of segments).
    pub worker_count: usize,
    /// Worker count that fixed the segment boundaries; persisted for resume.
    pub original_worker_count: usize,
    /// Segments in merge order.
    pub segments: Vec<Segment>,
}

impl TransferPlan {
    /// Plans a transfer from probe results and the caller's worker count.
    ///
    /// Falls back to one segment when ranges are unsupported or the size is
    /// unknown.
    #[must_use]
    pub fn new(probe: ProbeResult, requested_workers: usize) -> Self {
        match (probe.accepts_ranges, probe.total_size) {
            (true, Some(total)) => {
                let segments = plan_segments(total, requested_workers);
                let count = segments.len();
                Self {
                    total_size: Some(total),
                    accepts_ranges: true,
                    worker_count: count,
                    original_worker_count: count,
                    segments,
                }
            }
            (_, total_size) => Self {
                total_size,
                accepts_ranges: false,
                worker_count: 1,
                original_worker_count: 1,
                segments: vec![Segment {
                    index: 0,
                    start: 0,
                    len: total_size,
                }],
            },
        }
    }

    /// Whether progress for this plan can be persisted and resumed.
    ///
    /// Only ranged plans of known size can continue from stored offsets.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.accepts_ranges && self.total_size.is_some()
    }
}
