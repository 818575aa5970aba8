use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, info};
use uuid::Uuid;

use crate::task::ImageHandle;

/// Turns raw image input into an opaque handle the core stores as-is.
pub trait ImageIngest {
    fn ingest(&self, source: &Path) -> anyhow::Result<ImageHandle>;

    /// Releases a handle that never made it into a stored task.
    fn discard(&self, handle: &ImageHandle) -> anyhow::Result<()>;
}

/// Copies images under `<data>/images/` with a random name; the handle is
/// the path relative to the data directory.
#[derive(Debug, Clone)]
pub struct FileImageIngest {
    data_dir: PathBuf,
}

impl FileImageIngest {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }
}

impl ImageIngest for FileImageIngest {
    #[tracing::instrument(skip(self))]
    fn ingest(&self, source: &Path) -> anyhow::Result<ImageHandle> {
        if !source.is_file() {
            return Err(anyhow!("image not found: {}", source.display()));
        }

        let images_dir = self.data_dir.join("images");
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("failed to create {}", images_dir.display()))?;

        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "img".to_string());
        let name = format!("{}.{extension}", Uuid::new_v4());
        let target = images_dir.join(&name);
        fs::copy(source, &target).with_context(|| {
            format!("failed copying {} to {}", source.display(), target.display())
        })?;

        info!(source = %source.display(), handle = %name, "ingested image");
        Ok(ImageHandle(format!("images/{name}")))
    }

    #[tracing::instrument(skip(self))]
    fn discard(&self, handle: &ImageHandle) -> anyhow::Result<()> {
        let Some(name) = handle
            .as_str()
            .strip_prefix("images/")
            .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && *name != "..")
        else {
            return Err(anyhow!("not an ingested image: {}", handle.as_str()));
        };
        let path = self.data_dir.join("images").join(name);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        debug!(handle = %handle.as_str(), "discarded image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn copies_into_images_dir() {
        let data = tempdir().expect("tempdir");
        let source_dir = tempdir().expect("tempdir");
        let source = source_dir.path().join("Photo.JPG");
        fs::write(&source, b"jpeg bytes").expect("write source");

        let handle = FileImageIngest::new(data.path())
            .ingest(&source)
            .expect("ingest");
        assert!(handle.as_str().starts_with("images/"));
        assert!(handle.as_str().ends_with(".jpg"));
        assert_eq!(
            fs::read(data.path().join(handle.as_str())).expect("read copy"),
            b"jpeg bytes"
        );
    }

    #[test]
    fn discard_removes_the_copy() {
        let data = tempdir().expect("tempdir");
        let source_dir = tempdir().expect("tempdir");
        let source = source_dir.path().join("scan.png");
        fs::write(&source, b"png bytes").expect("write source");

        let ingest = FileImageIngest::new(data.path());
        let handle = ingest.ingest(&source).expect("ingest");
        ingest.discard(&handle).expect("discard");
        assert!(!data.path().join(handle.as_str()).exists());
        assert!(source.exists());
        assert!(
            ingest
                .discard(&ImageHandle("../elsewhere.png".to_string()))
                .is_err()
        );
    }

    #[test]
    fn missing_source_is_an_error() {
        let data = tempdir().expect("tempdir");
        assert!(
            FileImageIngest::new(data.path())
                .ingest(Path::new("/definitely/not/here.png"))
                .is_err()
        );
    }
}
