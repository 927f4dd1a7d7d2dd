use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::artifact::ArtifactGenerator;
use crate::assembler::{AssembledUpload, ChunkAssembler, ChunkUpload, SessionStatus};
use crate::delivery::{DeliveryHeaders, OpenedMedia};
use crate::layout::StoreLayout;
use crate::placement::PlacementService;
use crate::range::{negotiate, RequestedRange};
use crate::reaper::{ReaperHandle, SessionReaper};
use crate::resolver::{read_window, VersionResolver};
use crate::store::{ItemDraft, MetadataStore, StoredItem};
use crate::worker::PreviewWorker;
use crate::{FetchKind, ItemId, MediaConfig, MediaCtx, MediaError, MediaResult, SessionId};

/// What a chunk upload led to
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// More chunks expected
    Pending { received_bytes: u64, total_size: u64 },
    /// This chunk finished the upload; the item is placed and recorded
    Stored(StoredItem),
    /// The upload had already finished; nothing changed
    Settled,
}

/// The media adapter: what services embed to ingest and deliver media.
///
/// It wires the chunk assembler, placement, the metadata store, background
/// previews and range delivery together. Access checks are the caller's job.
pub struct MediaAdapter {
    config: MediaConfig,
    layout: StoreLayout,
    assembler: Arc<ChunkAssembler>,
    placement: PlacementService,
    metadata: Arc<dyn MetadataStore>,
    generator: Arc<ArtifactGenerator>,
    worker: PreviewWorker,
    resolver: VersionResolver,
}

impl MediaAdapter {
    /// Create an adapter with the stock image and video preview encoders.
    /// Must be called inside a tokio runtime.
    pub fn new<M: MetadataStore + 'static>(config: MediaConfig, metadata: M) -> Self {
        let metadata: Arc<dyn MetadataStore> = Arc::new(metadata);
        let generator = ArtifactGenerator::new(&config.preview_rules, metadata.clone());
        Self::with_generator(config, generator)
    }

    /// Create with a custom preview generator; its metadata store is shared
    pub fn with_generator(config: MediaConfig, generator: ArtifactGenerator) -> Self {
        let metadata = generator.metadata().clone();
        let generator = Arc::new(generator);
        let worker = PreviewWorker::spawn(generator.clone(), config.worker_rules.clone());
        Self {
            layout: StoreLayout::new(config.store_root.clone()),
            assembler: Arc::new(ChunkAssembler::new(
                config.staging_dir.clone(),
                config.chunk_rules.clone(),
            )),
            placement: PlacementService::new(),
            metadata,
            generator,
            worker,
            resolver: VersionResolver::new(),
            config,
        }
    }

    /// Start reclaiming abandoned uploads in the background
    pub fn spawn_reaper(&self) -> ReaperHandle {
        SessionReaper::new(self.assembler.clone(), self.config.reaper_interval).spawn()
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn assembler(&self) -> &Arc<ChunkAssembler> {
        &self.assembler
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn worker(&self) -> &PreviewWorker {
        &self.worker
    }

    /// Accept one chunk; the chunk that completes an upload also places and
    /// records the item before returning. If that fails, resending any chunk
    /// of the upload retries the placement.
    #[instrument(skip(self, ctx, chunk), fields(request_id = %ctx.request_id, project = %ctx.project, session_id = %chunk.session_id))]
    pub async fn upload_chunk(&self, ctx: &MediaCtx, chunk: ChunkUpload) -> MediaResult<UploadOutcome> {
        match self.assembler.accept_chunk(chunk).await? {
            SessionStatus::Pending {
                received_bytes,
                total_size,
            } => Ok(UploadOutcome::Pending {
                received_bytes,
                total_size,
            }),
            SessionStatus::Complete(assembled) => match self.finish_upload(ctx, &assembled).await {
                Ok(item) => {
                    self.assembler.confirm_handoff(&assembled.session_id).await;
                    Ok(UploadOutcome::Stored(item))
                }
                Err(e) => {
                    self.assembler.release_handoff(&assembled.session_id).await;
                    Err(e)
                }
            },
            SessionStatus::Settled => Ok(UploadOutcome::Settled),
        }
    }

    /// Place an assembled upload, record it, and queue its preview.
    ///
    /// Safe to call again with the same upload after a placement failure;
    /// the staging file is kept until placement succeeds. Callers driving the
    /// assembler directly confirm or release the handoff themselves.
    #[instrument(skip(self, ctx, assembled), fields(request_id = %ctx.request_id, project = %ctx.project, owner = %ctx.owner, filename = %assembled.filename))]
    pub async fn finish_upload(&self, ctx: &MediaCtx, assembled: &AssembledUpload) -> MediaResult<StoredItem> {
        let destination = self
            .layout
            .primary_path(&ctx.project, &ctx.owner, &assembled.filename)?;
        let ack = self.placement.place(&assembled.path, &destination).await?;

        let mut draft = ItemDraft::new(ctx.project.clone(), ctx.owner.clone(), ack.destination)
            .with_attributes(assembled.attributes.clone());
        if let Some(created_at) = assembled.created_at {
            draft = draft.with_created_at(created_at);
        }
        let item = self.metadata.create(draft).await?;

        if self.generator.supports(item.kind) {
            if let Err(e) = self.worker.submit(item.item_id) {
                warn!(item_id = %item.item_id, error = %e, "Could not queue preview");
            }
        }

        info!(
            item_id = %item.item_id,
            size_bytes = ack.size_bytes,
            outcome = ?ack.outcome,
            "Upload stored"
        );
        Ok(item)
    }

    /// Whether the chunk at `offset` was already received
    pub async fn probe(&self, session_id: &SessionId, offset: u64) -> MediaResult<bool> {
        self.assembler.probe(session_id, offset).await
    }

    /// Abandon an upload and drop its staging bytes
    pub async fn abort_upload(&self, session_id: &SessionId) -> MediaResult<()> {
        self.assembler.abort(session_id).await
    }

    pub async fn get(&self, item_id: ItemId) -> MediaResult<StoredItem> {
        self.metadata
            .get(item_id)
            .await?
            .ok_or_else(|| MediaError::item_not_found(item_id))
    }

    /// Open an item for reading. The body streams exactly the negotiated
    /// window. An unsatisfiable range is `RangeNotSatisfiable`; a missing
    /// preview is `NoPreviewAvailable`.
    #[instrument(skip(self, range), fields(item_id = %item_id, fetch_kind = ?fetch_kind))]
    pub async fn open(
        &self,
        item_id: ItemId,
        fetch_kind: FetchKind,
        range: Option<RequestedRange>,
    ) -> MediaResult<OpenedMedia> {
        let mut opened = self.head(item_id, fetch_kind, range).await?;
        opened.body = opened
            .decision
            .window()
            .map(|window| read_window(&opened.source.path, window));
        Ok(opened)
    }

    /// Everything `open` returns except the body
    pub async fn head(
        &self,
        item_id: ItemId,
        fetch_kind: FetchKind,
        range: Option<RequestedRange>,
    ) -> MediaResult<OpenedMedia> {
        let item = self.get(item_id).await?;
        let source = self.resolver.resolve(&item, fetch_kind.version()).await?;
        if !source.exists {
            return Err(MediaError::item_not_found(item_id));
        }

        let decision = negotiate(source.size, range);
        if !decision.is_satisfiable() {
            debug!(total_size = source.size, ?range, "Unsatisfiable range");
            return Err(MediaError::RangeNotSatisfiable {
                total_size: source.size,
            });
        }

        let headers = DeliveryHeaders::build(
            fetch_kind,
            item.kind,
            &source.path,
            &item.file_name(),
            &decision,
        );
        Ok(OpenedMedia {
            item_id,
            fetch_kind,
            source,
            decision,
            headers,
            body: None,
        })
    }

    /// Generate an item's preview now, waiting for the result
    pub async fn regenerate_preview(&self, item_id: ItemId) -> MediaResult<Option<PathBuf>> {
        let item = self.get(item_id).await?;
        self.generator
            .generate_preview(&item)
            .await
            .map_err(|e| MediaError::ArtifactGenerationFailed {
                item_id: item_id.to_string(),
                reason: e.message().to_string(),
            })
    }

    /// Delete an item's record and its files. Missing files are ignored.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove(&self, item_id: ItemId) -> MediaResult<StoredItem> {
        let item = self
            .metadata
            .delete(item_id)
            .await?
            .ok_or_else(|| MediaError::item_not_found(item_id))?;

        remove_file_if_present(&item.primary_path).await?;
        if let Some(preview) = item.preview() {
            remove_file_if_present(preview).await?;
        }
        info!("Item removed");
        Ok(item)
    }

    /// Finish queued previews and stop the worker
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}

async fn remove_file_if_present(path: &Path) -> MediaResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMetadataStore;
    use futures_util::StreamExt;

    fn adapter(root: &Path) -> MediaAdapter {
        MediaAdapter::new(MediaConfig::new(root), MemoryMetadataStore::new())
    }

    fn chunk(id: &str, offset: u64, data: &'static [u8], total: u64, name: &str) -> ChunkUpload {
        ChunkUpload::new(SessionId::from(id), offset, data)
            .with_total_size(total)
            .with_filename(name)
    }

    async fn body_of(opened: OpenedMedia) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(mut body) = opened.body {
            while let Some(chunk) = body.next().await {
                out.extend_from_slice(&chunk.unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn chunks_become_a_stored_item() {
        let dir = tempfile::tempdir().unwrap();
        let media = adapter(dir.path());
        let ctx = MediaCtx::new("proj", "alice");

        let first = media.upload_chunk(&ctx, chunk("u1", 5, b"world", 10, "notes.txt")).await.unwrap();
        assert!(matches!(first, UploadOutcome::Pending { received_bytes: 5, total_size: 10 }));
        assert!(media.probe(&SessionId::from("u1"), 5).await.unwrap());
        assert!(!media.probe(&SessionId::from("u1"), 0).await.unwrap());

        let UploadOutcome::Stored(item) = media
            .upload_chunk(&ctx, chunk("u1", 0, b"hello", 10, "notes.txt"))
            .await
            .unwrap()
        else {
            panic!("expected a stored item");
        };
        assert_eq!(item.primary_path, dir.path().join("proj/alice/notes.txt"));
        assert_eq!(tokio::fs::read(&item.primary_path).await.unwrap(), b"helloworld");

        let again = media.upload_chunk(&ctx, chunk("u1", 0, b"hello", 10, "notes.txt")).await.unwrap();
        assert!(matches!(again, UploadOutcome::Settled));
        media.shutdown().await;
    }

    #[tokio::test]
    async fn ranged_open_and_head() {
        let dir = tempfile::tempdir().unwrap();
        let media = adapter(dir.path());
        let ctx = MediaCtx::new("proj", "alice");
        let UploadOutcome::Stored(item) = media
            .upload_chunk(&ctx, chunk("u2", 0, b"0123456789", 10, "digits.bin"))
            .await
            .unwrap()
        else {
            panic!("expected a stored item");
        };

        let opened = media
            .open(item.item_id, FetchKind::Full, Some(RequestedRange::bounded(2, 5)))
            .await
            .unwrap();
        assert_eq!(opened.status(), 206);
        assert_eq!(opened.headers.content_range.as_deref(), Some("bytes 2-5/10"));
        assert_eq!(body_of(opened).await, b"2345");

        let head = media.head(item.item_id, FetchKind::Download, None).await.unwrap();
        assert_eq!(head.status(), 200);
        assert!(head.body.is_none());
        assert_eq!(head.headers.content_disposition, "attachment; filename=\"digits.bin\"");

        let err = media
            .open(item.item_id, FetchKind::Full, Some(RequestedRange::bounded(5, 20)))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::RangeNotSatisfiable { total_size: 10 }));

        let err = media.open(item.item_id, FetchKind::Preview, None).await.unwrap_err();
        assert!(matches!(err, MediaError::NoPreviewAvailable { .. }));
        media.shutdown().await;
    }

    #[tokio::test]
    async fn remove_deletes_record_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let media = adapter(dir.path());
        let ctx = MediaCtx::new("proj", "bob");
        let UploadOutcome::Stored(item) = media
            .upload_chunk(&ctx, chunk("u3", 0, b"%PDF", 4, "doc.pdf"))
            .await
            .unwrap()
        else {
            panic!("expected a stored item");
        };

        media.remove(item.item_id).await.unwrap();
        assert!(!item.primary_path.exists());
        assert!(matches!(
            media.open(item.item_id, FetchKind::Full, None).await,
            Err(MediaError::ItemNotFound { .. })
        ));
        assert!(matches!(media.remove(item.item_id).await, Err(MediaError::ItemNotFound { .. })));
        media.shutdown().await;
    }

    #[tokio::test]
    async fn failed_placement_is_retried_by_resending_a_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let media = adapter(dir.path());
        let ctx = MediaCtx::new("proj", "carol");

        // a file where the project directory belongs makes placement fail
        let blocker = dir.path().join("proj");
        tokio::fs::write(&blocker, b"in the way").await.unwrap();

        let first = media.upload_chunk(&ctx, chunk("u5", 0, b"payload", 7, "a.bin")).await;
        assert!(matches!(first, Err(MediaError::PlacementFailed { .. })));
        assert!(dir.path().join(".staging/u5.upload").exists());

        let retry = media.upload_chunk(&ctx, chunk("u5", 0, b"payload", 7, "a.bin")).await;
        assert!(matches!(retry, Err(MediaError::PlacementFailed { .. })));

        tokio::fs::remove_file(&blocker).await.unwrap();
        let UploadOutcome::Stored(item) = media
            .upload_chunk(&ctx, chunk("u5", 0, b"payload", 7, "a.bin"))
            .await
            .unwrap()
        else {
            panic!("expected a stored item");
        };
        assert_eq!(tokio::fs::read(&item.primary_path).await.unwrap(), b"payload");
        assert!(!dir.path().join(".staging/u5.upload").exists());

        let late = media.upload_chunk(&ctx, chunk("u5", 0, b"payload", 7, "a.bin")).await.unwrap();
        assert!(matches!(late, UploadOutcome::Settled));
        media.shutdown().await;
    }

    #[tokio::test]
    async fn unsafe_filename_is_rejected_before_placement() {
        let dir = tempfile::tempdir().unwrap();
        let media = adapter(dir.path());
        let ctx = MediaCtx::new("..", "bob");
        let result = media.upload_chunk(&ctx, chunk("u4", 0, b"x", 1, "a.txt")).await;
        assert!(matches!(result, Err(MediaError::Invalid { .. })));
        media.shutdown().await;
    }
}
