//! dog-media-axum: HTTP surface for dog-media.
//!
//! Chunked uploads, chunk probes, ranged `GET`/`HEAD` delivery with preview
//! fallback, and item removal, as an axum `Router`. Access checks belong in
//! middleware in front of these routes.

mod error;
pub mod routes;
pub mod state;

pub use error::MediaHttpError;
pub use routes::media_router;
pub use state::MediaState;
