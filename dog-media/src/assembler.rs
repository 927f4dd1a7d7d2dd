use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::ChunkRules;
use crate::layout;
use crate::{MediaError, MediaResult, SessionId};

const STAGING_EXTENSION: &str = "upload";

/// One chunk of a chunked upload. The first chunk of a session must declare
/// `total_size` and `filename`; later chunks may repeat them.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub session_id: SessionId,
    pub offset: u64,
    pub data: Bytes,
    pub total_size: Option<u64>,
    pub filename: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub attributes: serde_json::Value,
}

impl ChunkUpload {
    pub fn new<B: Into<Bytes>>(session_id: SessionId, offset: u64, data: B) -> Self {
        Self {
            session_id,
            offset,
            data: data.into(),
            total_size: None,
            filename: None,
            created_at: None,
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_total_size(mut self, total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self
    }

    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// State of one chunked transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: SessionId,
    pub total_size: u64,
    /// Received byte ranges as `start -> end` (end exclusive), never overlapping
    pub received: BTreeMap<u64, u64>,
    pub chunk_size_limit: u64,
    pub max_chunks: u32,
    pub filename: String,
    pub staging_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub client_created_at: Option<DateTime<Utc>>,
    pub attributes: serde_json::Value,
}

impl UploadSession {
    pub fn received_bytes(&self) -> u64 {
        self.received.iter().map(|(start, end)| end - start).sum()
    }

    pub fn chunk_count(&self) -> u32 {
        self.received.len() as u32
    }

    /// Complete iff the received ranges cover `[0, total_size)`
    pub fn is_complete(&self) -> bool {
        self.received_bytes() == self.total_size
    }

    fn classify(&self, start: u64, end: u64) -> ChunkFit {
        if let Some(&existing_end) = self.received.get(&start) {
            return if existing_end == end {
                ChunkFit::Duplicate
            } else {
                ChunkFit::Overlap
            };
        }
        if let Some((_, &prev_end)) = self.received.range(..start).next_back() {
            if prev_end > start {
                return ChunkFit::Overlap;
            }
        }
        if self.received.range(start..end).next().is_some() {
            return ChunkFit::Overlap;
        }
        ChunkFit::Fresh
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkFit {
    Fresh,
    Duplicate,
    Overlap,
}

/// A fully received upload, ready for placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledUpload {
    pub session_id: SessionId,
    pub path: PathBuf,
    pub filename: String,
    pub total_size: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub attributes: serde_json::Value,
}

/// Result of accepting a chunk
#[derive(Debug, Clone)]
pub enum SessionStatus {
    /// More bytes are expected, or every byte is in and another request is
    /// handing the upload off right now
    Pending { received_bytes: u64, total_size: u64 },
    /// This chunk completed the session; the caller owns the handoff until it
    /// calls `confirm_handoff` or `release_handoff`
    Complete(AssembledUpload),
    /// The session was already handed off; nothing to do
    Settled,
}

struct SessionState {
    session: UploadSession,
    last_activity: Instant,
    closed: bool,
    /// Every byte is in; kept until the handoff is confirmed
    assembled: Option<AssembledUpload>,
    handoff_claimed: bool,
}

/// Accumulates upload chunks into one staging file per session.
///
/// Each chunk is written at its declared offset, so the staging file ends up
/// in offset order no matter how chunks arrive. Chunks of one session are
/// serialized; different sessions proceed in parallel.
pub struct ChunkAssembler {
    staging_dir: PathBuf,
    rules: ChunkRules,
    sessions: DashMap<SessionId, Arc<Mutex<SessionState>>>,
    settled: DashMap<SessionId, Instant>,
}

impl ChunkAssembler {
    pub fn new<P: Into<PathBuf>>(staging_dir: P, rules: ChunkRules) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            rules,
            sessions: DashMap::new(),
            settled: DashMap::new(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn rules(&self) -> &ChunkRules {
        &self.rules
    }

    fn staging_path(&self, session_id: &SessionId) -> PathBuf {
        self.staging_dir
            .join(format!("{}.{}", session_id.as_str(), STAGING_EXTENSION))
    }

    /// Accept one chunk and report the session's status
    #[instrument(skip(self, chunk), fields(session_id = %chunk.session_id, offset = chunk.offset, len = chunk.data.len()))]
    pub async fn accept_chunk(&self, chunk: ChunkUpload) -> MediaResult<SessionStatus> {
        if !chunk.session_id.is_safe() {
            return Err(MediaError::invalid(format!(
                "invalid session id: {:?}",
                chunk.session_id.as_str()
            )));
        }

        let len = chunk.data.len() as u64;
        if len > self.rules.chunk_size_limit {
            return Err(MediaError::capacity(format!(
                "chunk of {} bytes exceeds limit of {}",
                len, self.rules.chunk_size_limit
            )));
        }

        if self.settled.contains_key(&chunk.session_id) {
            debug!("Chunk for settled session ignored");
            return Ok(SessionStatus::Settled);
        }

        let Some(state) = self.session_entry(&chunk)? else {
            debug!("Chunk for settled session ignored");
            return Ok(SessionStatus::Settled);
        };
        let mut state = state.lock().await;

        if state.closed {
            return if self.settled.contains_key(&chunk.session_id) {
                Ok(SessionStatus::Settled)
            } else {
                Err(MediaError::session_not_found(chunk.session_id.as_str()))
            };
        }

        if let Some(assembled) = state.assembled.clone() {
            if state.handoff_claimed {
                debug!("Chunk for an upload that is being handed off");
                return Ok(SessionStatus::Pending {
                    received_bytes: assembled.total_size,
                    total_size: assembled.total_size,
                });
            }
            debug!("Handing off an assembled upload again");
            state.handoff_claimed = true;
            state.last_activity = Instant::now();
            return Ok(SessionStatus::Complete(assembled));
        }

        let session = &state.session;
        if let Some(declared) = chunk.total_size {
            if declared != session.total_size {
                return Err(MediaError::invalid(format!(
                    "total size {} does not match session total {}",
                    declared, session.total_size
                )));
            }
        }

        let end = chunk
            .offset
            .checked_add(len)
            .filter(|end| *end <= session.total_size)
            .ok_or_else(|| {
                MediaError::capacity(format!(
                    "chunk at offset {} with {} bytes exceeds total size {}",
                    chunk.offset, len, session.total_size
                ))
            })?;

        if len == 0 && session.total_size != 0 {
            return Err(MediaError::invalid("empty chunk"));
        }

        let fit = session.classify(chunk.offset, end);
        match fit {
            ChunkFit::Overlap => {
                return Err(MediaError::invalid(format!(
                    "chunk {}..{} overlaps a received range",
                    chunk.offset, end
                )));
            }
            ChunkFit::Fresh if session.chunk_count() >= self.rules.max_chunks => {
                return Err(MediaError::capacity(format!(
                    "session already holds the maximum of {} chunks",
                    self.rules.max_chunks
                )));
            }
            _ => {}
        }

        let path = session.staging_path.clone();
        if let Err(source) = write_at(&self.staging_dir, &path, chunk.offset, &chunk.data).await {
            warn!(error = %source, "Staging write failed, dropping session");
            state.closed = true;
            drop(state);
            self.discard(&chunk.session_id).await;
            return Err(MediaError::StagingWriteFailed {
                session_id: chunk.session_id.to_string(),
                source,
            });
        }

        state.last_activity = Instant::now();
        state.session.updated_at = Utc::now();
        if fit == ChunkFit::Fresh && len > 0 {
            state.session.received.insert(chunk.offset, end);
        }

        if !state.session.is_complete() {
            return Ok(SessionStatus::Pending {
                received_bytes: state.session.received_bytes(),
                total_size: state.session.total_size,
            });
        }

        let session = &state.session;
        let assembled = AssembledUpload {
            session_id: session.session_id.clone(),
            path: session.staging_path.clone(),
            filename: session.filename.clone(),
            total_size: session.total_size,
            created_at: session.client_created_at,
            attributes: session.attributes.clone(),
        };
        info!(
            total_size = session.total_size,
            chunks = session.chunk_count(),
            "Upload session assembled"
        );
        state.assembled = Some(assembled.clone());
        state.handoff_claimed = true;

        Ok(SessionStatus::Complete(assembled))
    }

    /// Record that an assembled upload was stored. Later chunks for the
    /// session are answered with `Settled`.
    pub async fn confirm_handoff(&self, session_id: &SessionId) {
        let Some(state) = self.sessions.get(session_id).map(|s| s.clone()) else {
            return;
        };
        let mut state = state.lock().await;
        state.closed = true;
        // marker first: a chunk that misses the session must find it settled
        self.settled.insert(session_id.clone(), Instant::now());
        self.sessions.remove(session_id);
        debug!(session_id = %session_id, "Upload handoff confirmed");
    }

    /// Give an assembled upload back after a failed handoff. The staging
    /// file stays, and the next chunk for the session hands it off again.
    pub async fn release_handoff(&self, session_id: &SessionId) {
        if let Some(state) = self.sessions.get(session_id).map(|s| s.clone()) {
            let mut state = state.lock().await;
            state.handoff_claimed = false;
            state.last_activity = Instant::now();
            debug!(session_id = %session_id, "Upload handoff released");
        }
    }

    /// Find the session for a chunk, creating it when the chunk declares a
    /// total size. `None` means the session has already settled.
    fn session_entry(&self, chunk: &ChunkUpload) -> MediaResult<Option<Arc<Mutex<SessionState>>>> {
        if let Some(existing) = self.sessions.get(&chunk.session_id) {
            return Ok(Some(existing.clone()));
        }
        if self.settled.contains_key(&chunk.session_id) {
            return Ok(None);
        }

        let total_size = chunk
            .total_size
            .ok_or_else(|| MediaError::session_not_found(chunk.session_id.as_str()))?;
        let filename = chunk
            .filename
            .as_deref()
            .ok_or_else(|| MediaError::invalid("first chunk of a session must carry a filename"))
            .and_then(layout::file_name)?;

        let now = Utc::now();
        let state = match self.sessions.entry(chunk.session_id.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                if self.settled.contains_key(&chunk.session_id) {
                    return Ok(None);
                }
                debug!(total_size, "Opening upload session");
                let state = Arc::new(Mutex::new(SessionState {
                    session: UploadSession {
                        session_id: chunk.session_id.clone(),
                        total_size,
                        received: BTreeMap::new(),
                        chunk_size_limit: self.rules.chunk_size_limit,
                        max_chunks: self.rules.max_chunks,
                        filename,
                        staging_path: self.staging_path(&chunk.session_id),
                        created_at: now,
                        updated_at: now,
                        client_created_at: chunk.created_at,
                        attributes: chunk.attributes.clone(),
                    },
                    last_activity: Instant::now(),
                    closed: false,
                    assembled: None,
                    handoff_claimed: false,
                }));
                entry.insert(state.clone());
                state
            }
        };
        Ok(Some(state))
    }

    /// Whether a chunk starting at `offset` was already received
    pub async fn probe(&self, session_id: &SessionId, offset: u64) -> MediaResult<bool> {
        if self.settled.contains_key(session_id) {
            return Ok(true);
        }
        let state = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| MediaError::session_not_found(session_id.as_str()))?;
        let state = state.lock().await;
        Ok(state.session.received.contains_key(&offset))
    }

    /// Snapshot of a live session
    pub async fn session(&self, session_id: &SessionId) -> MediaResult<UploadSession> {
        let state = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| MediaError::session_not_found(session_id.as_str()))?;
        let state = state.lock().await;
        Ok(state.session.clone())
    }

    /// Abandon a session and delete its staging bytes
    pub async fn abort(&self, session_id: &SessionId) -> MediaResult<()> {
        let state = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| MediaError::session_not_found(session_id.as_str()))?;
        state.lock().await.closed = true;
        self.discard(session_id).await;
        Ok(())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    async fn discard(&self, session_id: &SessionId) {
        self.sessions.remove(session_id);
        remove_if_present(&self.staging_path(session_id)).await;
    }

    /// Reclaim sessions idle for longer than the idle timeout, forget old
    /// settled markers, and delete staging files no live session owns.
    /// Returns the number of staging files removed.
    pub async fn reclaim_idle(&self) -> MediaResult<usize> {
        let timeout = self.rules.idle_timeout;

        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let mut state = entry.value().try_lock().ok()?;
                if state.closed || state.handoff_claimed || state.last_activity.elapsed() < timeout {
                    return None;
                }
                state.closed = true;
                Some(entry.key().clone())
            })
            .collect();

        let mut reclaimed = 0;
        for session_id in &idle {
            debug!(session_id = %session_id, "Reclaiming idle upload session");
            self.sessions.remove(session_id);
            if remove_if_present(&self.staging_path(session_id)).await {
                reclaimed += 1;
            }
        }

        self.settled.retain(|_, at| at.elapsed() < timeout);
        reclaimed += self.sweep_orphans().await?;
        Ok(reclaimed)
    }

    /// Delete stale staging files that belong to no live session, such as
    /// those left behind by an earlier process
    async fn sweep_orphans(&self) -> MediaResult<usize> {
        let mut entries = match fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STAGING_EXTENSION) {
                continue;
            }
            let owned = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|stem| self.sessions.contains_key(&SessionId::from(stem)))
                .unwrap_or(false);
            if owned {
                continue;
            }

            let age = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or_default();
            if age >= self.rules.idle_timeout && remove_if_present(&path).await {
                debug!(path = %path.display(), "Removed orphaned staging file");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

async fn write_at(dir: &Path, path: &Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.sync_data().await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
            false
        }
    }
}
