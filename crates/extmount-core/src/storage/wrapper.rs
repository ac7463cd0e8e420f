//! Permission masks applied on top of a constructed storage.

use super::error::{StorageError, StorageResult};
use super::stream::{FileStream, OpenMode};
use super::{FileStat, FileType, FreeSpace, Storage};
use std::sync::Arc;

/// Permission bits understood by [`PermissionsMask`].
pub mod permission {
    /// Read files and list directories
    pub const READ: u32 = 1;
    /// Modify existing entries
    pub const UPDATE: u32 = 2;
    /// Create new entries
    pub const CREATE: u32 = 4;
    /// Delete entries
    pub const DELETE: u32 = 8;
    /// Share entries with others
    pub const SHARE: u32 = 16;
    /// Everything
    pub const ALL: u32 = 31;
}

/// Restricts a storage to the operations allowed by a permission mask.
///
/// Reads always pass through. Writes are refused with
/// [`StorageError::PermissionDenied`] when the needed bit is missing.
pub struct PermissionsMask {
    storage: Arc<dyn Storage>,
    mask: u32,
}

impl PermissionsMask {
    /// Wrap `storage`, allowing only the bits in `mask`
    pub fn new(storage: Arc<dyn Storage>, mask: u32) -> Self {
        Self { storage, mask }
    }

    /// Mask for a read-only mount
    pub fn read_only(storage: Arc<dyn Storage>) -> Self {
        Self::new(storage, permission::READ | permission::SHARE)
    }

    /// The permission bits this wrapper lets through
    pub fn mask(&self) -> u32 {
        self.mask
    }

    fn allows(&self, bit: u32) -> bool {
        self.mask & bit == bit
    }

    fn require(&self, bit: u32, path: &str) -> StorageResult<()> {
        if self.allows(bit) {
            Ok(())
        } else {
            Err(StorageError::PermissionDenied(path.to_string()))
        }
    }

    fn write_bit_for(&self, path: &str) -> StorageResult<u32> {
        Ok(if self.storage.file_exists(path)? {
            permission::UPDATE
        } else {
            permission::CREATE
        })
    }
}

impl Storage for PermissionsMask {
    fn id(&self) -> String {
        self.storage.id()
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.require(permission::CREATE, path)?;
        self.storage.mkdir(path)
    }

    fn rmdir(&self, path: &str) -> StorageResult<()> {
        self.require(permission::DELETE, path)?;
        self.storage.rmdir(path)
    }

    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        self.storage.opendir(path)
    }

    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        self.storage.stat(path)
    }

    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        self.storage.filetype(path)
    }

    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        self.storage.file_exists(path)
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        self.require(permission::DELETE, path)?;
        self.storage.unlink(path)
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        if mode.is_write() {
            self.require(self.write_bit_for(path)?, path)?;
        }
        self.storage.fopen(path, mode)
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        self.require(self.write_bit_for(path)?, path)?;
        self.storage.touch(path, mtime)
    }

    fn test(&self) -> StorageResult<()> {
        self.storage.test()
    }

    fn is_readable(&self, path: &str) -> StorageResult<bool> {
        self.storage.is_readable(path)
    }

    fn is_updatable(&self, path: &str) -> StorageResult<bool> {
        Ok(self.allows(permission::UPDATE) && self.storage.is_updatable(path)?)
    }

    fn is_creatable(&self, path: &str) -> StorageResult<bool> {
        Ok(self.allows(permission::CREATE) && self.storage.is_creatable(path)?)
    }

    fn is_deletable(&self, path: &str) -> StorageResult<bool> {
        Ok(self.allows(permission::DELETE) && self.storage.is_deletable(path)?)
    }

    fn is_sharable(&self, path: &str) -> StorageResult<bool> {
        Ok(self.allows(permission::SHARE) && self.storage.is_sharable(path)?)
    }

    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        self.require(permission::UPDATE, source)?;
        self.storage.rename(source, target)
    }

    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        self.require(permission::CREATE, target)?;
        self.storage.copy(source, target)
    }

    fn mime_type(&self, path: &str) -> StorageResult<String> {
        self.storage.mime_type(path)
    }

    fn free_space(&self, path: &str) -> StorageResult<FreeSpace> {
        self.storage.free_space(path)
    }

    fn file_put_contents(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.require(self.write_bit_for(path)?, path)?;
        self.storage.file_put_contents(path, data)
    }
}

/// Storage built from session-scoped credentials.
///
/// Everything is allowed except sharing, since the credentials that back the
/// mount are only valid for the current session.
pub struct SessionStorageWrapper(PermissionsMask);

impl SessionStorageWrapper {
    /// Wrap a storage constructed from session credentials
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self(PermissionsMask::new(
            storage,
            permission::ALL & !permission::SHARE,
        ))
    }
}

impl std::ops::Deref for SessionStorageWrapper {
    type Target = PermissionsMask;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Storage for SessionStorageWrapper {
    fn id(&self) -> String {
        self.0.id()
    }
    fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.0.mkdir(path)
    }
    fn rmdir(&self, path: &str) -> StorageResult<()> {
        self.0.rmdir(path)
    }
    fn opendir(&self, path: &str) -> StorageResult<Vec<String>> {
        self.0.opendir(path)
    }
    fn stat(&self, path: &str) -> StorageResult<FileStat> {
        self.0.stat(path)
    }
    fn filetype(&self, path: &str) -> StorageResult<FileType> {
        self.0.filetype(path)
    }
    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        self.0.file_exists(path)
    }
    fn unlink(&self, path: &str) -> StorageResult<()> {
        self.0.unlink(path)
    }
    fn fopen(&self, path: &str, mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        self.0.fopen(path, mode)
    }
    fn touch(&self, path: &str, mtime: Option<i64>) -> StorageResult<()> {
        self.0.touch(path, mtime)
    }
    fn test(&self) -> StorageResult<()> {
        self.0.test()
    }
    fn is_updatable(&self, path: &str) -> StorageResult<bool> {
        self.0.is_updatable(path)
    }
    fn is_creatable(&self, path: &str) -> StorageResult<bool> {
        self.0.is_creatable(path)
    }
    fn is_deletable(&self, path: &str) -> StorageResult<bool> {
        self.0.is_deletable(path)
    }
    fn is_sharable(&self, path: &str) -> StorageResult<bool> {
        self.0.is_sharable(path)
    }
    fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        self.0.rename(source, target)
    }
    fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        self.0.copy(source, target)
    }
    fn mime_type(&self, path: &str) -> StorageResult<String> {
        self.0.mime_type(path)
    }
    fn free_space(&self, path: &str) -> StorageResult<FreeSpace> {
        self.0.free_space(path)
    }
    fn file_put_contents(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.0.file_put_contents(path, data)
    }
}
