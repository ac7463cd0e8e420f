//! Storage rooted at a directory on the server's own filesystem.
//!
//! Only administrators may configure this backend; personal mounts are
//! refused before it is ever constructed.

use super::error::{StorageError, StorageResult};
use super::stream::{FileStream, LocalFileStream, OpenMode};
use super::{FileStat, FileType, FreeSpace, Storage, normalize_path, to_unix, unix_now};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

/// A local directory exposed through the storage contract.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    datadir: PathBuf,
}

impl LocalStorage {
    /// Expose `datadir`. The directory must exist when operations run,
    /// not at construction.
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        Self {
            datadir: datadir.into(),
        }
    }

    /// The root directory
    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    fn full_path(&self, path: &str) -> StorageResult<PathBuf> {
        let rel = normalize_path(path);
        if rel.split('/').any(|segment| segment == "..") {
            return Err(StorageError::PermissionDenied(format!(
                "path escapes storage root: {path}"
            )));
        }
        if rel.is_empty() {
            Ok(self.datadir.clone())
        } else {
            Ok(self.datadir.join(rel))
        }
    }

    fn copy_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
        if src.is_dir() {
            fs::create_dir_all(dst)?;
            for entry in fs::read_dir(src)? {
                let entry = entry?;
                Self::copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
            }
            Ok(())
        } else {
            fs::copy(src, dst).map(|_| ())
        }
    }
}

impl Storage for LocalStorage {
    fn id(&self) -> String {
        format!("local::{}/", self.datadir.display().to_string().trim_end_matches('/'))
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        let full = self.full_path(path)?;
        fs::create_dir(&full).map_err(|e| StorageError::from_io(e, path))
    }

    fn rmdir(&self, path: &str) -> StorageResult<()> {
        let full = self.full_path(path)?;
        if !full.is_dir() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        fs::remove_dir_all(&full).map_err(|e| StorageError::from_io(e, path))
    }

    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        let full = self.full_path(path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| StorageError::from_io(e, path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        let full = self.full_path(path)?;
        let meta = fs::metadata(&full).map_err(|e| StorageError::from_io(e, path))?;
        let mtime = meta.modified().map(to_unix).unwrap_or_default();
        let ctime = meta.created().map(to_unix).unwrap_or(mtime);
        Ok(FileStat {
            size: if meta.is_dir() { 0 } else { meta.len() },
            mtime,
            ctime,
        })
    }

    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        let full = self.full_path(path)?;
        let meta = fs::metadata(&full).map_err(|e| StorageError::from_io(e, path))?;
        Ok(if meta.is_dir() {
            FileType::Dir
        } else {
            FileType::File
        })
    }

    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.full_path(path)?.exists())
    }

    fn is_readable(&self, path: &str) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        Ok(if full.is_dir() {
            fs::read_dir(&full).is_ok()
        } else {
            File::open(&full).is_ok()
        })
    }

    fn is_updatable(&self, path: &str) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        Ok(fs::metadata(&full)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false))
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        let full = self.full_path(path)?;
        if full.is_dir() {
            return self.rmdir(path);
        }
        fs::remove_file(&full).map_err(|e| StorageError::from_io(e, path))
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        let full = self.full_path(path)?;
        if full.is_dir() {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Truncate => options.read(true).write(true).create(true).truncate(true),
            OpenMode::Append => options.read(true).append(true).create(true),
            OpenMode::CreateNew => options.read(true).write(true).create_new(true),
            OpenMode::Create => options.read(true).write(true).create(true),
        };
        let file = options
            .open(&full)
            .map_err(|e| StorageError::from_io(e, path))?;
        debug!(path = %full.display(), %mode, "Opened local file");
        Ok(Box::new(LocalFileStream::new(file)))
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        let full = self.full_path(path)?;
        if !full.exists() {
            File::create(&full).map_err(|e| StorageError::from_io(e, path))?;
        }
        let secs = mtime.unwrap_or_else(unix_now).max(0) as u64;
        let file = if full.is_dir() {
            File::open(&full)
        } else {
            OpenOptions::new().write(true).open(&full)
        }
        .map_err(|e| StorageError::from_io(e, path))?;
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))?;
        Ok(())
    }

    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        let from = self.full_path(source)?;
        let to = self.full_path(target)?;
        if !from.exists() {
            return Err(StorageError::NotFound(source.to_string()));
        }
        if to.is_dir() && from.is_dir() {
            fs::remove_dir_all(&to)?;
        }
        fs::rename(&from, &to).map_err(|e| StorageError::from_io(e, target))
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let from = self.full_path(source)?;
        let to = self.full_path(target)?;
        if !from.exists() {
            return Err(StorageError::NotFound(source.to_string()));
        }
        Self::copy_recursive(&from, &to).map_err(|e| StorageError::from_io(e, target))
    }

    fn free_space(&self, path: &str) -> StorageResult<FreeSpace> {
        let full = self.full_path(path)?;
        Ok(fs2::available_space(&full).map_or(FreeSpace::Unknown, FreeSpace::Known))
    }

    fn test(&self) -> StorageResult<()> {
        if self.datadir.is_dir() {
            Ok(())
        } else {
            Err(StorageError::not_available(
                format!("local directory {} does not exist", self.datadir.display()),
                super::error::code::INCOMPLETE_CONF,
            ))
        }
    }
}
