//! Placeholder for a mount whose backend could not be constructed.
//!
//! The mount table keeps one storage per mount point even when a backend is
//! broken; [`FailedStorage`] stands in for it and raises the original
//! failure lazily, from whichever operation actually needed the remote.

use super::error::{StorageError, StorageResult};
use super::stream::{FileStream, OpenMode};
use super::{FileStat, FileType, FreeSpace, Storage};

/// Storage whose every operation fails with [`StorageError::NotAvailable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStorage {
    message: String,
    code: i32,
}

impl FailedStorage {
    /// Capture the message and code of the construction failure
    pub fn new(cause: &StorageError) -> Self {
        match cause {
            StorageError::NotAvailable { message, code } => Self {
                message: message.clone(),
                code: *code,
            },
            other => Self {
                message: other.to_string(),
                code: other.code(),
            },
        }
    }

    /// Message of the original failure
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Code of the original failure
    pub fn code(&self) -> i32 {
        self.code
    }

    fn fail<T>(&self) -> StorageResult<T> {
        Err(StorageError::NotAvailable {
            message: self.message.clone(),
            code: self.code,
        })
    }
}

impl Storage for FailedStorage {
    fn id(&self) -> String {
        format!("failedstorage::{}", self.code)
    }

    fn mkdir(&self, _path: &str) -> StorageResult<()> {
        self.fail()
    }

    fn rmdir(&self, _path: &str) -> StorageResult<()> {
        self.fail()
    }

    fn opendir(&self, _path: &str) -> StorageResult<Vec<String>> {
        self.fail()
    }

    fn stat(&self, _path: &str) -> StorageResult<FileStat> {
        self.fail()
    }

    fn filetype(&self, _path: &str) -> StorageResult<FileType> {
        self.fail()
    }

    fn file_exists(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn unlink(&self, _path: &str) -> StorageResult<()> {
        self.fail()
    }

    fn fopen(&self, _path: &str, _mode: OpenMode) -> StorageResult<Box<dyn FileStream>> {
        self.fail()
    }

    fn touch(&self, _path: &str, _mtime: Option<i64>) -> StorageResult<()> {
        self.fail()
    }

    fn test(&self) -> StorageResult<()> {
        self.fail()
    }

    fn is_dir(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn is_file(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn is_readable(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn is_updatable(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn is_creatable(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn is_deletable(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn is_sharable(&self, _path: &str) -> StorageResult<bool> {
        self.fail()
    }

    fn rename(&self, _source: &str, _target: &str) -> StorageResult<()> {
        self.fail()
    }

    fn copy(&self, _source: &str, _target: &str) -> StorageResult<()> {
        self.fail()
    }

    fn mime_type(&self, _path: &str) -> StorageResult<String> {
        self.fail()
    }

    fn free_space(&self, _path: &str) -> StorageResult<FreeSpace> {
        self.fail()
    }

    fn file_get_contents(&self, _path: &str) -> StorageResult<Vec<u8>> {
        self.fail()
    }

    fn file_put_contents(&self, _path: &str, _data: &[u8]) -> StorageResult<()> {
        self.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_matches_cause<T: std::fmt::Debug>(result: StorageResult<T>, message: &str, code: i32) {
        match result {
            Err(StorageError::NotAvailable { message: m, code: c }) => {
                assert_eq!(m, message);
                assert_eq!(c, code);
            }
            other => panic!("expected NotAvailable, got {other:?}"),
        }
    }

    #[test]
    fn test_every_operation_raises_original_failure() {
        let cause = StorageError::not_available("connection refused", 6);
        let storage = FailedStorage::new(&cause);
        let (m, c) = ("connection refused", 6);

        assert_matches_cause(storage.mkdir("a"), m, c);
        assert_matches_cause(storage.rmdir("a"), m, c);
        assert_matches_cause(storage.opendir("a"), m, c);
        assert_matches_cause(storage.stat("a"), m, c);
        assert_matches_cause(storage.filetype("a"), m, c);
        assert_matches_cause(storage.is_dir("a"), m, c);
        assert_matches_cause(storage.is_file("a"), m, c);
        assert_matches_cause(storage.is_readable("a"), m, c);
        assert_matches_cause(storage.is_updatable("a"), m, c);
        assert_matches_cause(storage.is_creatable("a"), m, c);
        assert_matches_cause(storage.is_deletable("a"), m, c);
        assert_matches_cause(storage.is_sharable("a"), m, c);
        assert_matches_cause(storage.file_exists("a"), m, c);
        assert_matches_cause(storage.unlink("a"), m, c);
        assert_matches_cause(storage.fopen("a", OpenMode::Read).map(|_| ()), m, c);
        assert_matches_cause(storage.touch("a", None), m, c);
        assert_matches_cause(storage.rename("a", "b"), m, c);
        assert_matches_cause(storage.copy("a", "b"), m, c);
        assert_matches_cause(storage.mime_type("a"), m, c);
        assert_matches_cause(storage.free_space("a"), m, c);
        assert_matches_cause(storage.test(), m, c);
        assert_matches_cause(storage.file_get_contents("a"), m, c);
        assert_matches_cause(storage.file_put_contents("a", b""), m, c);
    }

    #[test]
    fn test_non_availability_cause_keeps_message_and_code() {
        let cause = StorageError::InvalidConfig("missing host".into());
        let storage = FailedStorage::new(&cause);
        assert_eq!(storage.message(), cause.to_string());
        assert_eq!(storage.code(), cause.code());
        assert_matches_cause(storage.stat(""), &cause.to_string(), cause.code());
    }
}
