use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{bounding_box, Dimensions, PreviewEncoder};
use crate::config::PreviewRules;
use crate::ArtifactError;

/// Renders a sped-up looping GIF from a video with ffmpeg.
///
/// Encoding is two passes: the first builds a colour palette from the
/// sampled frames, the second maps the frames onto it. The palette is a
/// scratch file next to the target and is always deleted afterwards.
#[derive(Debug, Clone)]
pub struct VideoPreviewEncoder {
    rules: PreviewRules,
}

impl VideoPreviewEncoder {
    pub fn new(rules: &PreviewRules) -> Self {
        Self { rules: rules.clone() }
    }

    /// Width and height of the first video stream
    async fn probe(&self, source: &Path) -> Result<Dimensions, ArtifactError> {
        let stdout = run(
            &self.rules.ffprobe,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-select_streams"),
                OsStr::new("v:0"),
                OsStr::new("-show_entries"),
                OsStr::new("stream=width,height"),
                OsStr::new("-of"),
                OsStr::new("csv=s=x:p=0"),
                source.as_os_str(),
            ],
        )
        .await
        .map_err(|e| ArtifactError::permanent(format!("ffprobe: {}", e.message())))?;

        parse_dimensions(&stdout)
            .ok_or_else(|| ArtifactError::permanent(format!("no video stream in {}", source.display())))
    }

    fn filters(&self) -> String {
        format!(
            "setpts=PTS/{},fps={},scale={}:-1:flags=lanczos",
            self.rules.video_speed, self.rules.video_fps, self.rules.video_scale
        )
    }

    async fn render(&self, source: &Path, palette: &Path, target: &Path) -> Result<(), ArtifactError> {
        let filters = self.filters();

        let palette_filter = format!("{},palettegen", filters);
        run(
            &self.rules.ffmpeg,
            [
                OsStr::new("-y"),
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-i"),
                source.as_os_str(),
                OsStr::new("-vf"),
                OsStr::new(&palette_filter),
                palette.as_os_str(),
            ],
        )
        .await?;

        let gif_filter = format!("{} [x]; [x][1:v] paletteuse", filters);
        run(
            &self.rules.ffmpeg,
            [
                OsStr::new("-y"),
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-i"),
                source.as_os_str(),
                OsStr::new("-i"),
                palette.as_os_str(),
                OsStr::new("-lavfi"),
                OsStr::new(&gif_filter),
                OsStr::new("-loop"),
                OsStr::new("0"),
                OsStr::new("-f"),
                OsStr::new("gif"),
                target.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PreviewEncoder for VideoPreviewEncoder {
    fn extension(&self) -> &'static str {
        "gif"
    }

    async fn encode(&self, source: &Path, target: &Path) -> Result<Dimensions, ArtifactError> {
        let original = self.probe(source).await?;
        let fitted = bounding_box(original.width, original.height, self.rules.bounding_box)
            .ok_or_else(|| ArtifactError::permanent("video has zero-sized frames"))?;
        debug!(
            width = original.width,
            height = original.height,
            box_width = fitted.width,
            box_height = fitted.height,
            "Probed video"
        );

        let palette = palette_path(target);
        let rendered = self.render(source, &palette, target).await;
        if let Err(e) = tokio::fs::remove_file(&palette).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(palette = %palette.display(), error = %e, "Failed to remove palette");
            }
        }
        rendered?;

        let width = self.rules.video_scale;
        let height = ((width as f64) * (original.height as f64) / (original.width as f64))
            .round()
            .max(1.0) as u32;
        Ok(Dimensions::new(width, height))
    }
}

fn palette_path(target: &Path) -> PathBuf {
    target.with_extension("palette.png")
}

/// Parse ffprobe's `WIDTHxHEIGHT` output
fn parse_dimensions(output: &str) -> Option<Dimensions> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let dims = Dimensions::new(w.trim().parse().ok()?, h.trim().parse().ok()?);
    (dims.width > 0 && dims.height > 0).then_some(dims)
}

/// Run a tool to completion and return its stdout. A tool that cannot be
/// spawned is a permanent failure, a failing run is retryable.
async fn run<I, S>(program: &Path, args: I) -> Result<String, ArtifactError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ArtifactError::permanent(format!("failed to run {}: {}", program.display(), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ArtifactError::retryable(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
