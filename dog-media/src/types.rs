use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::pin::Pin;
use uuid::Uuid;

/// Stream of bytes for media content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Identifier of a chunked upload session, chosen by the client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string (e.g., a client-side upload UUID)
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Session ids name staging files, so they must be a single safe path segment
    pub fn is_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of a stored item, assigned by the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which physical version of an item to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSelector {
    Full,
    Preview,
}

/// What the client asked to fetch; decides version and disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    Full,
    Preview,
    Download,
}

impl FetchKind {
    pub fn version(&self) -> VersionSelector {
        match self {
            FetchKind::Full | FetchKind::Download => VersionSelector::Full,
            FetchKind::Preview => VersionSelector::Preview,
        }
    }

    /// Parse a route segment; an empty segment means `full`
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "" | "full" => Some(FetchKind::Full),
            "preview" => Some(FetchKind::Preview),
            "download" => Some(FetchKind::Download),
            _ => None,
        }
    }
}

/// Coarse media classification, derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tif" | "tiff" => MediaKind::Image,
            "mp4" | "m4v" | "mov" | "webm" | "mkv" | "avi" | "mpeg" | "mpg" | "3gp" => MediaKind::Video,
            "mp3" | "wav" | "ogg" | "oga" | "flac" | "m4a" | "aac" | "opus" => MediaKind::Audio,
            "pdf" | "txt" | "md" | "doc" | "docx" | "odt" | "xls" | "xlsx" | "ppt" | "pptx" => {
                MediaKind::Document
            }
            _ => MediaKind::Other,
        }
    }

    /// Cache policy for responses serving this kind
    pub fn cache_control(&self) -> &'static str {
        match self {
            MediaKind::Image | MediaKind::Video | MediaKind::Audio => "private, max-age=604800",
            MediaKind::Document | MediaKind::Other => "private, no-cache",
        }
    }
}

/// Content type for a path, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mpeg" | "mpg" => "video/mpeg",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "opus" => "audio/opus",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Caller context: which project and owner an operation acts for, and the
/// request id its log lines carry. Access checks happen before this crate is
/// called.
#[derive(Debug, Clone)]
pub struct MediaCtx {
    pub project: String,
    pub owner: String,
    pub request_id: String,
}

impl MediaCtx {
    pub fn new<P: Into<String>, O: Into<String>>(project: P, owner: O) -> Self {
        Self {
            project: project.into(),
            owner: owner.into(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }
}
