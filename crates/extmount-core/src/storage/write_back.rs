//! Write-back staging for backends without random-access writes.
//!
//! Object stores and most remote protocols can only replace a file as a
//! whole. [`WriteBackStream`] gives callers an ordinary seekable stream:
//! 1. On open: a local staging file is created (and prefilled with the remote
//!    content for modes that keep it)
//! 2. On write: bytes land in the staging file
//! 3. On close or drop: the staging file is uploaded, then deleted
//!
//! The staging file is a [`tempfile::NamedTempFile`], so it is removed on
//! every exit path: successful upload, failed upload, or a panic unwinding
//! through the owner.

use super::error::{StorageError, StorageResult};
use super::stream::{FileStream, OpenMode};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, error};

/// Callback that pushes a finished staging file to the remote.
pub type Uploader = Box<dyn FnOnce(&Path) -> StorageResult<()> + Send>;

/// A local staging file that is uploaded when the stream is closed.
pub struct WriteBackStream {
    staging: Option<NamedTempFile>,
    upload: Option<Uploader>,
    remote_path: String,
}

impl WriteBackStream {
    /// Create an empty staging file for `remote_path`.
    ///
    /// The staging file keeps the remote file's extension so tools that sniff
    /// by name behave the same as on the remote.
    pub fn new(remote_path: impl Into<String>, upload: Uploader) -> StorageResult<Self> {
        let remote_path = remote_path.into();
        let suffix = Path::new(&remote_path)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let staging = tempfile::Builder::new()
            .prefix("extmount-")
            .suffix(&suffix)
            .tempfile()?;
        debug!(remote = %remote_path, staging = %staging.path().display(), "Staging write-back file");
        Ok(Self {
            staging: Some(staging),
            upload: Some(upload),
            remote_path,
        })
    }

    /// Open a staging stream for `mode`.
    ///
    /// `existing` is the current remote content, if any; it is only copied in
    /// when the mode keeps content. Append positions the cursor at the end.
    pub fn open(
        remote_path: impl Into<String>,
        mode: OpenMode,
        existing: Option<&mut dyn Read>,
        upload: Uploader,
    ) -> StorageResult<Self> {
        let mut stream = Self::new(remote_path, upload)?;
        if mode.keeps_content()
            && let Some(source) = existing
        {
            let file = stream.file_mut()?;
            io::copy(source, file)?;
        }
        let pos = if mode == OpenMode::Append {
            SeekFrom::End(0)
        } else {
            SeekFrom::Start(0)
        };
        stream.file_mut()?.seek(pos)?;
        Ok(stream)
    }

    /// Path of the local staging file while the stream is open
    pub fn staging_path(&self) -> Option<&Path> {
        self.staging.as_ref().map(NamedTempFile::path)
    }

    /// Remote path this stream uploads to
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    fn file_mut(&mut self) -> io::Result<&mut std::fs::File> {
        self.staging
            .as_mut()
            .map(NamedTempFile::as_file_mut)
            .ok_or_else(|| io::Error::other("write-back stream already closed"))
    }

    fn finish(&mut self) -> StorageResult<()> {
        let Some(mut staging) = self.staging.take() else {
            return Ok(());
        };
        let upload = self.upload.take();

        staging.as_file_mut().flush()?;
        let result = match upload {
            Some(upload) => upload(staging.path()),
            None => Ok(()),
        };

        // Dropping the NamedTempFile would also remove it; close() reports failures.
        if let Err(e) = staging.close() {
            error!(app = "files_external", remote = %self.remote_path, error = %e, "Failed to remove staging file");
        }
        result
    }
}

impl Read for WriteBackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file_mut()?.read(buf)
    }
}

impl Write for WriteBackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file_mut()?.flush()
    }
}

impl Seek for WriteBackStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file_mut()?.seek(pos)
    }
}

impl FileStream for WriteBackStream {
    fn close(mut self: Box<Self>) -> StorageResult<()> {
        self.finish()
    }
}

impl Drop for WriteBackStream {
    fn drop(&mut self) {
        if self.staging.is_some()
            && let Err(e) = self.finish()
        {
            error!(app = "files_external", remote = %self.remote_path, error = %e, "Write-back upload failed");
        }
    }
}

impl std::fmt::Debug for WriteBackStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBackStream")
            .field("remote_path", &self.remote_path)
            .field("staging", &self.staging_path())
            .finish_non_exhaustive()
    }
}

/// Turn a staging-file path into an upload failure if it cannot be read.
pub fn read_staged(path: &Path) -> StorageResult<Vec<u8>> {
    std::fs::read(path).map_err(StorageError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recording_uploader(target: Arc<Mutex<Option<Vec<u8>>>>) -> Uploader {
        Box::new(move |path: &Path| {
            *target.lock() = Some(std::fs::read(path)?);
            Ok(())
        })
    }

    #[test]
    fn test_close_uploads_and_removes_staging() {
        let uploaded = Arc::new(Mutex::new(None));
        let mut stream =
            WriteBackStream::new("/docs/a.txt", recording_uploader(uploaded.clone())).unwrap();
        let staging = stream.staging_path().unwrap().to_path_buf();
        assert!(staging.exists());
        assert!(staging.to_string_lossy().ends_with(".txt"));

        stream.write_all(b"hello").unwrap();
        Box::new(stream).close().unwrap();

        assert_eq!(uploaded.lock().as_deref(), Some(&b"hello"[..]));
        assert!(!staging.exists());
    }

    #[test]
    fn test_failed_upload_still_removes_staging() {
        let mut stream = WriteBackStream::new(
            "/broken.bin",
            Box::new(|_: &Path| Err(StorageError::protocol("simulated upload failure"))),
        )
        .unwrap();
        let staging = stream.staging_path().unwrap().to_path_buf();
        stream.write_all(b"data").unwrap();

        let err = Box::new(stream).close().unwrap_err();
        assert!(matches!(err, StorageError::Protocol(_)));
        assert!(!staging.exists());
    }

    #[test]
    fn test_drop_uploads_once() {
        let uploaded = Arc::new(Mutex::new(None));
        let staging;
        {
            let mut stream =
                WriteBackStream::new("/f", recording_uploader(uploaded.clone())).unwrap();
            staging = stream.staging_path().unwrap().to_path_buf();
            stream.write_all(b"dropped").unwrap();
        }
        assert_eq!(uploaded.lock().as_deref(), Some(&b"dropped"[..]));
        assert!(!staging.exists());
    }

    #[test]
    fn test_append_keeps_existing_content() {
        let uploaded = Arc::new(Mutex::new(None));
        let mut existing: &[u8] = b"head-";
        let mut stream = WriteBackStream::open(
            "/log.txt",
            OpenMode::Append,
            Some(&mut existing),
            recording_uploader(uploaded.clone()),
        )
        .unwrap();
        stream.write_all(b"tail").unwrap();
        Box::new(stream).close().unwrap();
        assert_eq!(uploaded.lock().as_deref(), Some(&b"head-tail"[..]));
    }

    #[test]
    fn test_truncate_ignores_existing_content() {
        let uploaded = Arc::new(Mutex::new(None));
        let mut existing: &[u8] = b"old content";
        let mut stream = WriteBackStream::open(
            "/f.txt",
            OpenMode::Truncate,
            Some(&mut existing),
            recording_uploader(uploaded.clone()),
        )
        .unwrap();
        stream.write_all(b"new").unwrap();
        Box::new(stream).close().unwrap();
        assert_eq!(uploaded.lock().as_deref(), Some(&b"new"[..]));
    }
}
