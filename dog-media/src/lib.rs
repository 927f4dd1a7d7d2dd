//! # dog-media: Media ingestion and delivery for DogRS
//!
//! `dog-media` takes user uploads from the first chunk to the last byte served:
//!
//! - **Chunked uploads**: chunks arrive in any order and are written at their
//!   offsets into one staging file per session; duplicates are harmless
//! - **Atomic placement**: assembled files are renamed into the object store,
//!   with a copy-then-rename fallback across devices so readers never see a
//!   half-written file
//! - **Background previews**: resized images and short animated video
//!   previews, generated off the upload path with bounded retries
//! - **Range delivery**: single-range `bytes=` semantics with exact
//!   `200`/`206`/`416` decisions and the headers to go with them
//! - **Server agnostic**: no HTTP types; `dog-media-axum` maps it onto routes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_media::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> MediaResult<()> {
//! let media = MediaAdapter::new(MediaConfig::new("./media"), MemoryMetadataStore::new());
//! let _reaper = media.spawn_reaper();
//!
//! let ctx = MediaCtx::new("holiday", "anna");
//! let chunk = ChunkUpload::new(SessionId::from("upload-1"), 0, &b"hello"[..])
//!     .with_total_size(5)
//!     .with_filename("hello.txt");
//!
//! if let UploadOutcome::Stored(item) = media.upload_chunk(&ctx, chunk).await? {
//!     let opened = media
//!         .open(item.item_id, FetchKind::Full, Some(RequestedRange::bounded(0, 1)))
//!         .await?;
//!     assert_eq!(opened.status(), 206);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! chunk ─▶ ChunkAssembler ─▶ PlacementService ─▶ MetadataStore ─▶ PreviewWorker
//!                                                      │               │
//! read ──▶ VersionResolver ─▶ negotiate ─▶ stream      └─ set_preview ◀┘
//! ```

pub mod adapter;
pub mod artifact;
pub mod assembler;
mod config;
pub mod delivery;
mod error;
pub mod layout;
mod locks;
pub mod placement;
pub mod range;
pub mod reaper;
pub mod resolver;
pub mod store;
mod types;
pub mod worker;

pub use adapter::{MediaAdapter, UploadOutcome};
pub use artifact::{bounding_box, ArtifactGenerator, Dimensions, PreviewEncoder};
pub use assembler::{AssembledUpload, ChunkAssembler, ChunkUpload, SessionStatus, UploadSession};
pub use config::{ChunkRules, MediaConfig, PreviewRules, RasterFormat, WorkerRules};
pub use delivery::{DeliveryHeaders, OpenedMedia};
pub use error::{ArtifactError, MediaError, MediaResult};
pub use locks::KeyedLocks;
pub use placement::{PlacementAck, PlacementOutcome, PlacementService};
pub use range::{negotiate, parse_range_header, ByteWindow, DeliveryDecision, RequestedRange};
pub use resolver::{PhysicalSource, VersionResolver};
pub use store::{ItemDraft, MemoryMetadataStore, MetadataStore, StoredItem};
pub use types::{
    content_type_for, ByteStream, FetchKind, ItemId, MediaCtx, MediaKind, SessionId, VersionSelector,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ChunkUpload, FetchKind, ItemId, MediaAdapter, MediaConfig, MediaCtx, MediaError, MediaResult,
        MemoryMetadataStore, MetadataStore, RequestedRange, SessionId, StoredItem, UploadOutcome,
    };
}
