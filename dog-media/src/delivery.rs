use std::path::Path;

use crate::range::DeliveryDecision;
use crate::resolver::PhysicalSource;
use crate::{content_type_for, ByteStream, FetchKind, ItemId, MediaKind};

pub const ACCEPT_RANGES_BYTES: &str = "bytes";

/// Response metadata for one delivery, independent of any HTTP library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHeaders {
    pub accept_ranges: &'static str,
    pub content_length: u64,
    pub content_range: Option<String>,
    pub content_type: &'static str,
    pub cache_control: &'static str,
    pub content_disposition: String,
}

impl DeliveryHeaders {
    /// Headers for serving `path` as `fetch_kind`. Downloads are attachments
    /// named after `file_name`; everything else is inline.
    pub fn build(
        fetch_kind: FetchKind,
        kind: MediaKind,
        path: &Path,
        file_name: &str,
        decision: &DeliveryDecision,
    ) -> Self {
        let content_disposition = match fetch_kind {
            FetchKind::Download => format!("attachment; filename=\"{}\"", quoted(file_name)),
            FetchKind::Full | FetchKind::Preview => "inline".to_string(),
        };

        Self {
            accept_ranges: ACCEPT_RANGES_BYTES,
            content_length: decision.content_length(),
            content_range: decision.content_range(),
            content_type: content_type_for(path),
            cache_control: kind.cache_control(),
            content_disposition,
        }
    }

    /// Header name/value pairs in lowercase wire form
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("accept-ranges", self.accept_ranges.to_string()),
            ("content-length", self.content_length.to_string()),
            ("content-type", self.content_type.to_string()),
            ("cache-control", self.cache_control.to_string()),
            ("content-disposition", self.content_disposition.clone()),
        ];
        if let Some(range) = &self.content_range {
            pairs.push(("content-range", range.clone()));
        }
        pairs
    }
}

fn quoted(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

/// An item opened for delivery
pub struct OpenedMedia {
    pub item_id: ItemId,
    pub fetch_kind: FetchKind,
    pub source: PhysicalSource,
    pub decision: DeliveryDecision,
    pub headers: DeliveryHeaders,
    /// Exactly the negotiated window; `None` for HEAD, 416, and empty bodies
    pub body: Option<ByteStream>,
}

impl OpenedMedia {
    pub fn status(&self) -> u16 {
        self.decision.status()
    }
}

impl std::fmt::Debug for OpenedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedMedia")
            .field("item_id", &self.item_id)
            .field("fetch_kind", &self.fetch_kind)
            .field("source", &self.source)
            .field("decision", &self.decision)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{negotiate, RequestedRange};

    #[test]
    fn download_is_an_attachment() {
        let decision = negotiate(1000, None);
        let headers = DeliveryHeaders::build(
            FetchKind::Download,
            MediaKind::Video,
            Path::new("/s/p/o/clip.mp4"),
            "clip \"final\".mp4",
            &decision,
        );
        assert_eq!(headers.content_disposition, "attachment; filename=\"clip _final_.mp4\"");
        assert_eq!(headers.content_type, "video/mp4");
        assert_eq!(headers.content_length, 1000);
        assert_eq!(headers.content_range, None);
    }

    #[test]
    fn preview_is_inline_and_typed_by_artifact() {
        let decision = negotiate(1000, Some(RequestedRange::bounded(0, 499)));
        let headers = DeliveryHeaders::build(
            FetchKind::Preview,
            MediaKind::Video,
            Path::new("/s/p/o/thumbnails/clip.mp4.gif"),
            "clip.mp4",
            &decision,
        );
        assert_eq!(headers.content_disposition, "inline");
        assert_eq!(headers.content_type, "image/gif");
        assert_eq!(headers.cache_control, "private, max-age=604800");

        let pairs = headers.pairs();
        assert!(pairs.contains(&("content-range", "bytes 0-499/1000".to_string())));
        assert!(pairs.contains(&("accept-ranges", "bytes".to_string())));
        assert!(pairs.contains(&("content-length", "500".to_string())));
    }

    #[test]
    fn unsatisfiable_has_empty_length() {
        let decision = negotiate(10, Some(RequestedRange::from_start(50)));
        let headers = DeliveryHeaders::build(
            FetchKind::Full,
            MediaKind::Document,
            Path::new("/s/a.pdf"),
            "a.pdf",
            &decision,
        );
        assert_eq!(headers.content_length, 0);
        assert_eq!(headers.content_range.as_deref(), Some("bytes */10"));
        assert_eq!(headers.cache_control, "private, no-cache");
    }
}
