use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::{MediaError, MediaResult};

/// Configuration for the media pipeline
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Root of the object store (`<root>/<project>/<owner>/<file>`)
    pub store_root: PathBuf,

    /// Private staging area for in-flight chunked uploads
    pub staging_dir: PathBuf,

    /// Rules for chunked uploads
    pub chunk_rules: ChunkRules,

    /// Rules for derived preview artifacts
    pub preview_rules: PreviewRules,

    /// Rules for the background preview worker
    pub worker_rules: WorkerRules,

    /// How often the session reaper runs
    pub reaper_interval: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("./media"),
            staging_dir: PathBuf::from("./tmp"),
            chunk_rules: ChunkRules::default(),
            preview_rules: PreviewRules::default(),
            worker_rules: WorkerRules::default(),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// Limits applied to every upload session
#[derive(Debug, Clone)]
pub struct ChunkRules {
    /// Largest accepted chunk payload (bytes)
    pub chunk_size_limit: u64,

    /// Upper bound on distinct chunks per session
    pub max_chunks: u32,

    /// A session with no chunk for this long is reclaimable
    pub idle_timeout: Duration,
}

impl Default for ChunkRules {
    fn default() -> Self {
        Self {
            chunk_size_limit: 50 * 1024 * 1024, // 50MB
            max_chunks: 9_999,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Output format for image previews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Jpeg,
}

impl RasterFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg => "jpg",
        }
    }
}

/// Preview generation parameters
#[derive(Debug, Clone)]
pub struct PreviewRules {
    /// Longer side of the preview bounding box
    pub bounding_box: u32,

    /// Encoded format of image previews
    pub image_format: RasterFormat,

    /// Frame rate of animated video previews
    pub video_fps: f32,

    /// Frame width of animated video previews
    pub video_scale: u32,

    /// Playback speed-up of animated video previews
    pub video_speed: u32,

    /// ffmpeg binary used for video previews
    pub ffmpeg: PathBuf,

    /// ffprobe binary used to read video dimensions
    pub ffprobe: PathBuf,
}

impl Default for PreviewRules {
    fn default() -> Self {
        Self {
            bounding_box: 320,
            image_format: RasterFormat::Png,
            video_fps: 0.75,
            video_scale: 180,
            video_speed: 4,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Background preview worker settings
#[derive(Debug, Clone)]
pub struct WorkerRules {
    /// Previews encoded at the same time
    pub concurrency: usize,

    /// Attempts per preview before giving up (first run included)
    pub max_attempts: u32,

    /// Backoff before the first retry, doubled per attempt
    pub base_backoff: Duration,

    /// Ceiling for the retry backoff
    pub max_backoff: Duration,
}

impl Default for WorkerRules {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl WorkerRules {
    /// Backoff to wait after `attempt` failed (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl MediaConfig {
    /// Create a config rooted at `store_root`, staging under `<root>/.staging`
    pub fn new<P: Into<PathBuf>>(store_root: P) -> Self {
        let store_root = store_root.into();
        Self {
            staging_dir: store_root.join(".staging"),
            store_root,
            ..Self::default()
        }
    }

    /// Build a config from `DOG_MEDIA_*` environment variables
    pub fn from_env() -> MediaResult<Self> {
        fn get_env(key: &str) -> MediaResult<String> {
            env::var(key).map_err(|_| MediaError::invalid(format!("{} environment variable required", key)))
        }

        fn parse_env<T: std::str::FromStr>(key: &str) -> MediaResult<Option<T>> {
            match env::var(key) {
                Ok(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|_| MediaError::invalid(format!("{} has an invalid value: {}", key, raw))),
                Err(_) => Ok(None),
            }
        }

        let mut config = Self::new(get_env("DOG_MEDIA_ROOT")?);

        if let Ok(staging) = env::var("DOG_MEDIA_STAGING") {
            config.staging_dir = PathBuf::from(staging);
        }
        if let Some(limit) = parse_env("DOG_MEDIA_CHUNK_LIMIT")? {
            config.chunk_rules.chunk_size_limit = limit;
        }
        if let Some(max) = parse_env("DOG_MEDIA_MAX_CHUNKS")? {
            config.chunk_rules.max_chunks = max;
        }
        if let Some(secs) = parse_env::<u64>("DOG_MEDIA_IDLE_TIMEOUT_SECS")? {
            config.chunk_rules.idle_timeout = Duration::from_secs(secs);
        }
        if let Ok(ffmpeg) = env::var("DOG_MEDIA_FFMPEG") {
            config.preview_rules.ffmpeg = PathBuf::from(ffmpeg);
        }
        if let Ok(ffprobe) = env::var("DOG_MEDIA_FFPROBE") {
            config.preview_rules.ffprobe = PathBuf::from(ffprobe);
        }

        Ok(config)
    }

    /// Set the staging directory
    pub fn with_staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Set chunk rules
    pub fn with_chunk_rules(mut self, rules: ChunkRules) -> Self {
        self.chunk_rules = rules;
        self
    }

    /// Set preview rules
    pub fn with_preview_rules(mut self, rules: PreviewRules) -> Self {
        self.preview_rules = rules;
        self
    }

    /// Set worker rules
    pub fn with_worker_rules(mut self, rules: WorkerRules) -> Self {
        self.worker_rules = rules;
        self
    }

    /// Set the reaper interval
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }
}

impl ChunkRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-chunk byte limit
    pub fn with_chunk_size_limit(mut self, bytes: u64) -> Self {
        self.chunk_size_limit = bytes;
        self
    }

    /// Set the chunk count limit
    pub fn with_max_chunks(mut self, max: u32) -> Self {
        self.max_chunks = max;
        self
    }

    /// Set the idle window after which a session is reclaimed
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl WorkerRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }
}
