use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::media::is_supported_extension;

/// Filename stem every source file is stored under.
pub const SOURCE_STEM: &str = "file";
/// Sub-directory the worker writes its transcripts into.
pub const OUTPUT_DIRNAME: &str = "transcriptions";

/// Maps asset ids to their on-disk layout under a data root.
///
/// ```text
/// <root>/<id>/file.<ext>
/// <root>/<id>/transcriptions/
/// ```
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids double as directory names, so they must be a single plain component.
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// `<root>/<id>`, without touching the filesystem.
    pub fn asset_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Creates `<root>/<id>` if needed and returns it. Succeeds when the
    /// directory already exists.
    pub fn asset_directory(&self, id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.asset_path(id);
        ensure_directory(&dir)?;
        Ok(dir)
    }

    pub fn source_file_path(&self, id: &str, extension: &str) -> PathBuf {
        let ext = extension.trim_start_matches('.');
        self.asset_path(id)
            .join(format!("{}.{}", SOURCE_STEM, ext))
    }

    pub fn output_directory(&self, id: &str) -> PathBuf {
        self.asset_path(id).join(OUTPUT_DIRNAME)
    }

    /// Creates the output directory so it can be bind-mounted into a worker.
    pub fn ensure_output_directory(&self, id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.output_directory(id);
        ensure_directory(&dir)?;
        Ok(dir)
    }

    /// Finds the stored source file by scanning the asset directory for a
    /// file with a supported media extension.
    pub fn locate_source_file(&self, id: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(self.asset_path(id)).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(is_supported_extension)
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Returns true if the output directory exists and holds at least one file.
    pub fn has_output(&self, id: &str) -> bool {
        walkdir::WalkDir::new(self.output_directory(id))
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_file())
    }

    /// Removes `<root>/<id>` and everything below it. Missing is not an error.
    pub fn remove_asset_directory(&self, id: &str) -> Result<(), StorageError> {
        let dir = self.asset_path(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove {
                path: dir,
                source: e,
            }),
        }
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
            StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
    }

    Ok(())
}

/// Writes `content` to `path`, refusing to overwrite an existing file.
pub fn write_new_file(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
}
