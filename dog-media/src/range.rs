//! Byte-range negotiation for partial content delivery.
//!
//! Only the first range of a `Range` header is honoured. A missing start
//! means offset 0 and a missing end means the last byte, so `bytes=-99`
//! reads the first hundred bytes rather than the last hundred.

use serde::{Deserialize, Serialize};

/// A client-requested range; either bound may be absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestedRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl RequestedRange {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self::new(Some(start), None)
    }

    pub fn bounded(start: u64, end: u64) -> Self {
        Self::new(Some(start), Some(end))
    }
}

/// Inclusive byte window to stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteWindow {
    pub start: u64,
    pub end: u64,
}

impl ByteWindow {
    /// Bytes covered. Both ends are inclusive, so this is never zero.
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Outcome of range negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryDecision {
    /// 200: the whole entity
    Full { content_length: u64 },
    /// 206: one window of the entity
    Partial {
        window: ByteWindow,
        total_size: u64,
    },
    /// 416: nothing can be served
    Unsatisfiable { total_size: u64 },
}

impl DeliveryDecision {
    pub fn status(&self) -> u16 {
        match self {
            DeliveryDecision::Full { .. } => 200,
            DeliveryDecision::Partial { .. } => 206,
            DeliveryDecision::Unsatisfiable { .. } => 416,
        }
    }

    /// Value for `Content-Range`, absent on full responses
    pub fn content_range(&self) -> Option<String> {
        match self {
            DeliveryDecision::Full { .. } => None,
            DeliveryDecision::Partial { window, total_size } => {
                Some(format!("bytes {}-{}/{}", window.start, window.end, total_size))
            }
            DeliveryDecision::Unsatisfiable { total_size } => Some(format!("bytes */{}", total_size)),
        }
    }

    /// Bytes in the response body
    pub fn content_length(&self) -> u64 {
        match self {
            DeliveryDecision::Full { content_length } => *content_length,
            DeliveryDecision::Partial { window, .. } => window.byte_len(),
            DeliveryDecision::Unsatisfiable { .. } => 0,
        }
    }

    /// Window to read from the source; `None` for an empty full body or 416
    pub fn window(&self) -> Option<ByteWindow> {
        match self {
            DeliveryDecision::Full { content_length: 0 } => None,
            DeliveryDecision::Full { content_length } => Some(ByteWindow {
                start: 0,
                end: content_length - 1,
            }),
            DeliveryDecision::Partial { window, .. } => Some(*window),
            DeliveryDecision::Unsatisfiable { .. } => None,
        }
    }

    pub fn is_satisfiable(&self) -> bool {
        !matches!(self, DeliveryDecision::Unsatisfiable { .. })
    }
}

/// Decide what to serve for an entity of `total_size` bytes.
///
/// A requested end past the last byte, a start past the last byte, or a
/// start after the end is unsatisfiable. Any range against an empty entity
/// is unsatisfiable as well.
pub fn negotiate(total_size: u64, requested: Option<RequestedRange>) -> DeliveryDecision {
    let Some(range) = requested else {
        return DeliveryDecision::Full {
            content_length: total_size,
        };
    };
    if total_size == 0 {
        return DeliveryDecision::Unsatisfiable { total_size };
    }

    let last = total_size - 1;
    let start = range.start.unwrap_or(0);
    let end = range.end.unwrap_or(last);
    if start > last || end > last || start > end {
        return DeliveryDecision::Unsatisfiable { total_size };
    }

    DeliveryDecision::Partial {
        window: ByteWindow { start, end },
        total_size,
    }
}

/// Parse a `Range` header value, keeping only the first range.
///
/// Returns `None` when the header does not use the `bytes` unit. Bounds that
/// do not parse as integers count as absent.
pub fn parse_range_header(value: &str) -> Option<RequestedRange> {
    let (unit, ranges) = value.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }
    let first = ranges.split(',').next()?.trim();
    let (start, end) = match first.split_once('-') {
        Some((start, end)) => (start, end),
        None => (first, ""),
    };
    Some(RequestedRange {
        start: start.trim().parse().ok(),
        end: end.trim().parse().ok(),
    })
}
