use std::path::{Component, Path, PathBuf};

use crate::{MediaError, MediaResult};

/// Directory beside each primary file that holds its previews
pub const THUMBNAIL_DIR: &str = "thumbnails";

/// Maps logical names onto the object-store directory tree:
/// `<root>/<project>/<owner>/<filename>` for content and
/// `<root>/<project>/<owner>/thumbnails/<filename>.<ext>` for previews.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for an uploaded file
    pub fn primary_path(&self, project: &str, owner: &str, filename: &str) -> MediaResult<PathBuf> {
        Ok(self
            .root
            .join(segment(project, "project")?)
            .join(segment(owner, "owner")?)
            .join(file_name(filename)?))
    }

    /// Preview path for a primary file, with the given extension appended
    pub fn preview_path(primary: &Path, extension: &str) -> MediaResult<PathBuf> {
        let name = primary
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MediaError::invalid(format!("{} has no file name", primary.display())))?;
        let dir = primary.parent().unwrap_or_else(|| Path::new(""));
        Ok(dir.join(THUMBNAIL_DIR).join(format!("{}.{}", name, extension)))
    }
}

/// Reduce a client-supplied filename to a safe single path segment.
/// Directory parts are dropped, only the final component is kept.
pub fn file_name(raw: &str) -> MediaResult<String> {
    let normalized = raw.replace('\\', "/");
    let last = normalized.rsplit('/').next().unwrap_or_default().trim();
    segment(last, "filename").map(str::to_string)
}

fn segment<'a>(raw: &'a str, what: &str) -> MediaResult<&'a str> {
    let mut components = Path::new(raw).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !raw.contains('/') && !raw.contains('\0') => Ok(raw),
        _ => Err(MediaError::invalid(format!("invalid {}: {:?}", what, raw))),
    }
}
