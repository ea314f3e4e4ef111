use crate::error::IngestError;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// A file read from disk, not yet parsed.
#[derive(Debug, Clone)]
pub struct RawArtifact {
    pub path: PathBuf,
    /// Short name recorded as `source_document` when a record carries none.
    pub name: String,
    /// Whether the path was named explicitly rather than found by walking a
    /// directory.
    pub explicit: bool,
    pub bytes: Vec<u8>,
}

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path, explicit: bool) -> Result<RawArtifact, IngestError> {
        let bytes = fs::read(path).await.map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Ok(RawArtifact {
            path: path.to_path_buf(),
            name,
            explicit,
            bytes,
        })
    }

    /// Every `*.json` file below `dir`, in path order.
    pub async fn read_directory(dir: &Path) -> Result<Vec<RawArtifact>, IngestError> {
        let mut paths = Vec::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| IngestError::Io {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path.to_path_buf());
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(Self::read_file(&path, false).await?);
        }

        Ok(files)
    }

    /// Read every input path; directories expand to the JSON files inside.
    pub async fn read_paths(paths: &[PathBuf]) -> Result<Vec<RawArtifact>, IngestError> {
        let mut files = Vec::new();

        for path in paths {
            let metadata = fs::metadata(path).await.map_err(|source| IngestError::Io {
                path: path.clone(),
                source,
            })?;
            if metadata.is_dir() {
                files.extend(Self::read_directory(path).await?);
            } else {
                files.push(Self::read_file(path, true).await?);
            }
        }

        Ok(files)
    }
}
