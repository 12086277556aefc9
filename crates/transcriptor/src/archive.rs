//! Packs a finished output directory into a downloadable archive.

use std::io::{Cursor, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

pub const ZIP_CONTENT_TYPE: &str = "application/zip";

pub trait ArtifactAssembler: Send + Sync {
    /// MIME type of what `assemble` produces.
    fn content_type(&self) -> &'static str;

    /// File extension for download names, without the dot.
    fn extension(&self) -> &'static str;

    /// Packs every file under `dir`. Fails with `DirectoryMissing` when
    /// `dir` is not a directory.
    fn assemble(&self, dir: &Path) -> Result<Vec<u8>, ArchiveError>;
}

/// Deflate-compressed zip with paths relative to the packed directory.
#[derive(Debug, Clone, Default)]
pub struct ZipAssembler;

impl ZipAssembler {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactAssembler for ZipAssembler {
    fn content_type(&self) -> &'static str {
        ZIP_CONTENT_TYPE
    }

    fn extension(&self) -> &'static str {
        "zip"
    }

    fn assemble(&self, dir: &Path) -> Result<Vec<u8>, ArchiveError> {
        if !dir.is_dir() {
            return Err(ArchiveError::DirectoryMissing(dir.to_path_buf()));
        }

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut files = 0usize;

        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ArchiveError::Write {
                path: e.path().unwrap_or(dir).to_path_buf(),
                source: e.into(),
            })?;
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type().is_dir() {
                writer.add_directory(format!("{}/", name), options)?;
            } else if entry.file_type().is_file() {
                let content = std::fs::read(path).map_err(|e| ArchiveError::Write {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                writer.start_file(name, options)?;
                writer.write_all(&content).map_err(|e| ArchiveError::Write {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                files += 1;
            }
        }

        let bytes = writer.finish()?.into_inner();
        log::debug!(
            "Packed {} file(s) from {} into {} bytes",
            files,
            dir.display(),
            bytes.len()
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn entries(bytes: Vec<u8>) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut content = String::new();
            if file.is_file() {
                file.read_to_string(&mut content).unwrap();
            }
            out.push((file.name().to_string(), content));
        }
        out
    }

    #[test]
    fn test_assemble_nested_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("transcript.txt"), "hello world").unwrap();
        std::fs::create_dir_all(root.join("subtitles")).unwrap();
        std::fs::write(root.join("subtitles/en.srt"), "1\n00:00:00,000 --> 00:00:01,000\nhi\n")
            .unwrap();

        let bytes = ZipAssembler::new().assemble(root).unwrap();
        let entries = entries(bytes);
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(names, vec!["subtitles/", "subtitles/en.srt", "transcript.txt"]);
        assert_eq!(entries[2].1, "hello world");
    }

    #[test]
    fn test_assemble_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let bytes = ZipAssembler::new().assemble(temp_dir.path()).unwrap();
        assert!(entries(bytes).is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("transcriptions");

        match ZipAssembler::new().assemble(&missing) {
            Err(ArchiveError::DirectoryMissing(p)) => assert_eq!(p, missing),
            other => panic!("Expected DirectoryMissing, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.mp3");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(
            ZipAssembler::new().assemble(&file),
            Err(ArchiveError::DirectoryMissing(_))
        ));
    }

    #[test]
    fn test_metadata() {
        let assembler = ZipAssembler::new();
        assert_eq!(assembler.content_type(), "application/zip");
        assert_eq!(assembler.extension(), "zip");
    }
}
