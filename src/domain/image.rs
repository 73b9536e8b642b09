//! Images discovered in the input folder.

use std::path::{Path, PathBuf};

/// Recognized image suffixes. Matching is case-sensitive.
pub const IMAGE_EXTENSIONS: [&str; 2] = [".png", ".jpg"];

/// Check whether a directory entry name is a captioning candidate
pub fn is_candidate_name(name: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// An image file to caption. Its bytes are read on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Full path to the image
    pub path: PathBuf,

    /// File name including extension
    pub file_name: String,

    /// File name without its extension
    pub stem: String,
}

impl ImageRecord {
    /// Build a record from a path, if its file name is a UTF-8 candidate name
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        if !is_candidate_name(&file_name) {
            return None;
        }
        let stem = Path::new(&file_name).file_stem()?.to_str()?.to_string();

        Some(Self {
            path,
            file_name,
            stem,
        })
    }

    /// Where this image's caption lives in `output_dir`
    pub fn artifact_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.txt", self.stem))
    }

    /// Where the legacy mode copies this image in `output_dir`
    pub fn copy_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.file_name)
    }

    /// Load the raw image bytes
    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}
