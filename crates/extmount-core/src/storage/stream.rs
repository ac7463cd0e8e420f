//! Open modes and the stream handles returned by `fopen`.

use super::error::{StorageError, StorageResult};
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::str::FromStr;

/// How a file is opened.
///
/// Parsed from the classic `fopen` mode strings; the `b`/`t` suffixes are
/// accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// `r`: read only, the file must exist
    Read,
    /// `r+`: read and write, keep content, the file must exist
    ReadWrite,
    /// `w`, `w+`: truncate or create
    Truncate,
    /// `a`, `a+`: keep content, writes go to the end
    Append,
    /// `x`, `x+`: create, fail if the file exists
    CreateNew,
    /// `c`, `c+`: create if missing, keep content
    Create,
}

impl OpenMode {
    /// Whether the mode can modify the file
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Whether existing remote content has to be staged before writing
    pub fn keeps_content(self) -> bool {
        matches!(self, Self::ReadWrite | Self::Append | Self::Create)
    }

    /// Whether the file must already exist
    pub fn requires_existing(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// The canonical mode string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::ReadWrite => "r+",
            Self::Truncate => "w",
            Self::Append => "a",
            Self::CreateNew => "x",
            Self::Create => "c",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core: String = s.chars().filter(|c| !matches!(c, 'b' | 't')).collect();
        match core.as_str() {
            "r" => Ok(Self::Read),
            "r+" => Ok(Self::ReadWrite),
            "w" | "w+" => Ok(Self::Truncate),
            "a" | "a+" => Ok(Self::Append),
            "x" | "x+" => Ok(Self::CreateNew),
            "c" | "c+" => Ok(Self::Create),
            _ => Err(StorageError::NotSupported(format!("fopen mode '{s}'"))),
        }
    }
}

/// An open file on a storage.
///
/// Handles are plain `Read + Write + Seek` values. Dropping a handle closes it;
/// [`close`](FileStream::close) does the same but reports errors from the
/// final flush or upload instead of only logging them.
pub trait FileStream: Read + Write + Seek + Send {
    /// Close the stream, surfacing flush/upload failures
    fn close(self: Box<Self>) -> StorageResult<()>;
}

/// A read-only stream over downloaded or local content.
pub struct ReadStream {
    inner: ReadSource,
}

enum ReadSource {
    Memory(Cursor<Vec<u8>>),
    File(File),
}

impl ReadStream {
    /// Stream over an in-memory buffer
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            inner: ReadSource::Memory(Cursor::new(data)),
        }
    }

    /// Stream over a local file, positioned at its start
    pub fn from_file(mut file: File) -> StorageResult<Self> {
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner: ReadSource::File(file),
        })
    }

    /// Download into an anonymous temp file and stream from there
    pub fn download<F>(fetch: F) -> StorageResult<Self>
    where
        F: FnOnce(&mut dyn Write) -> StorageResult<()>,
    {
        let mut file = tempfile::tempfile()?;
        fetch(&mut file)?;
        Self::from_file(file)
    }
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            ReadSource::Memory(c) => c.read(buf),
            ReadSource::File(f) => f.read(buf),
        }
    }
}

impl Write for ReadStream {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "stream was opened read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for ReadStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            ReadSource::Memory(c) => c.seek(pos),
            ReadSource::File(f) => f.seek(pos),
        }
    }
}

impl FileStream for ReadStream {
    fn close(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

/// A stream backed directly by a local file with native random access.
pub struct LocalFileStream {
    file: File,
}

impl LocalFileStream {
    /// Wrap an already opened file
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl Read for LocalFileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for LocalFileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for LocalFileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl FileStream for LocalFileStream {
    fn close(mut self: Box<Self>) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_parsing() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("rb".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("r+".parse::<OpenMode>().unwrap(), OpenMode::ReadWrite);
        assert_eq!("wb".parse::<OpenMode>().unwrap(), OpenMode::Truncate);
        assert_eq!("wt".parse::<OpenMode>().unwrap(), OpenMode::Truncate);
        assert_eq!("ab".parse::<OpenMode>().unwrap(), OpenMode::Append);
        assert_eq!("x+".parse::<OpenMode>().unwrap(), OpenMode::CreateNew);
        assert_eq!("c".parse::<OpenMode>().unwrap(), OpenMode::Create);
        assert!("q".parse::<OpenMode>().is_err());
    }

    #[test]
    fn test_mode_properties() {
        assert!(!OpenMode::Read.is_write());
        assert!(OpenMode::Append.keeps_content());
        assert!(!OpenMode::Truncate.keeps_content());
        assert!(OpenMode::ReadWrite.requires_existing());
    }

    #[test]
    fn test_read_stream_rejects_writes() {
        let mut stream = ReadStream::from_bytes(b"hello".to_vec());
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
        assert!(stream.write(b"x").is_err());
    }

    #[test]
    fn test_download_streams_from_start() {
        let mut stream = ReadStream::download(|sink| {
            sink.write_all(b"remote bytes")?;
            Ok(())
        })
        .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"remote bytes");
    }
}
