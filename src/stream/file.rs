//! The capture-file backend.
//!
//! Handles the current file header, the legacy v0.5/v0.6 layouts and the
//! optional extension headers preceding the stream comment.  Reading goes
//! through the shared byte buffer; writing appends capture packets after
//! the header and comment.

use super::{ByteSource, LinkCtx, ReadBuffer};
use crate::address::StreamAddr;
use crate::error::{Error, Result};
use crate::wire::{
    FileExtension, FileHeader, FileVersion, FILE_EXTENSION_SIZE, FILE_HEADER_SIZE,
    HEADER_EXT_NONE, HEADER_EXT_PADDING,
};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default buffer size: relatively small so pipes stay responsive.
const DEFAULT_BUFFER_SIZE: usize = 8192;

pub(super) struct FileLink {
    file: Option<File>,
    /// Close the handle on drop (false for adopted descriptors without the
    /// FCLOSE flag).
    owns_handle: bool,
    force_flush: bool,
    unlink_path: Option<PathBuf>,
}

impl ByteSource for FileLink {
    fn fill(
        &mut self,
        dst: &mut [u8],
        _timeout: Option<Duration>,
        _ctx: &mut LinkCtx,
    ) -> Result<usize> {
        let file = self.file.as_mut().expect("file is open");
        Ok(file.read(dst)?)
    }
}

impl Drop for FileLink {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if !self.owns_handle {
                // the caller keeps the descriptor
                std::mem::forget(file);
            }
        }
        if let Some(path) = &self.unlink_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub(super) struct FileBackend {
    link: FileLink,
    buf: ReadBuffer,
    version: FileVersion,
    mpid: String,
    comment: String,
}

impl FileBackend {
    /// Open a capture file for reading.
    pub fn open_path(path: &Path, flags: u16, buffer_size: usize) -> Result<FileBackend> {
        let file = File::open(path)?;
        Self::open(file, true, flags, unlink_path(path, flags), buffer_size)
    }

    /// Adopt an already-open descriptor for reading.
    pub fn open_fd(fd: i32, flags: u16, buffer_size: usize) -> Result<FileBackend> {
        let file = unsafe { File::from_raw_fd(fd) };
        let owns = flags & StreamAddr::FCLOSE != 0;
        Self::open(file, owns, flags, None, buffer_size)
    }

    fn open(
        mut file: File,
        owns_handle: bool,
        flags: u16,
        unlink: Option<PathBuf>,
        buffer_size: usize,
    ) -> Result<FileBackend> {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };

        // even though the current header is larger than the legacy ones, a
        // file shorter than this cannot hold anything useful
        let mut raw = [0u8; FILE_HEADER_SIZE];
        file.read_exact(&mut raw).map_err(|_| Error::CapfileInvalid)?;
        let header = FileHeader::parse(&raw)?;

        if header.has_extensions() {
            walk_extensions(&mut file, header.header_offset)?;
        }

        file.seek(SeekFrom::Start(header.header_offset as u64))?;
        let mut comment = vec![0u8; header.comment_size as usize];
        file.read_exact(&mut comment)
            .map_err(|_| Error::CapfileTruncated)?;
        let comment = String::from_utf8_lossy(&comment).into_owned();

        if !header.version.supported() {
            warn!(
                "stream uses version {}, this library supports up to {}; \
                 change library version or convert the file",
                header.version,
                crate::wire::LIBRARY_VERSION
            );
            return Err(Error::invalid_input("unsupported stream version"));
        }

        Ok(FileBackend {
            link: FileLink {
                file: Some(file),
                owns_handle,
                force_flush: false,
                unlink_path: unlink,
            },
            buf: ReadBuffer::new(buffer_size),
            version: header.version,
            mpid: header.mpid().to_owned(),
            comment,
        })
    }

    /// Create a capture file: header, comment, then packets.
    pub fn create_path(path: &Path, flags: u16, mpid: &str, comment: &str) -> Result<FileBackend> {
        let file = File::create(path)?;
        Self::create(file, true, flags, unlink_path(path, flags), mpid, comment)
    }

    /// Adopt an already-open descriptor for writing.
    pub fn create_fd(fd: i32, flags: u16, mpid: &str, comment: &str) -> Result<FileBackend> {
        let file = unsafe { File::from_raw_fd(fd) };
        let owns = flags & StreamAddr::FCLOSE != 0;
        Self::create(file, owns, flags, None, mpid, comment)
    }

    fn create(
        mut file: File,
        owns_handle: bool,
        flags: u16,
        unlink: Option<PathBuf>,
        mpid: &str,
        comment: &str,
    ) -> Result<FileBackend> {
        let header = FileHeader::new(mpid, comment.len() as u32);
        header.write_to(&mut file)?;
        file.write_all(comment.as_bytes())?;

        Ok(FileBackend {
            link: FileLink {
                file: Some(file),
                owns_handle,
                force_flush: flags & StreamAddr::FLUSH != 0,
                unlink_path: unlink,
            },
            buf: ReadBuffer::new(DEFAULT_BUFFER_SIZE),
            version: header.version,
            mpid: header.mpid().to_owned(),
            comment: comment.to_owned(),
        })
    }

    pub fn split(&mut self) -> (&mut ReadBuffer, &mut FileLink) {
        (&mut self.buf, &mut self.link)
    }

    pub fn buffer_capacity(&self) -> u64 {
        self.buf.data.len() as u64
    }

    pub fn version(&self) -> FileVersion {
        self.version
    }

    pub fn mpid(&self) -> &str {
        &self.mpid
    }

    pub fn comment(&self) -> Option<&str> {
        Some(self.comment.as_str())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self.link.file.as_mut().expect("file is open");
        file.write_all(data)?;
        if self.link.force_flush {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let file = self.link.file.as_mut().expect("file is open");
        file.flush()?;
        Ok(())
    }
}

fn unlink_path(path: &Path, flags: u16) -> Option<PathBuf> {
    (flags & StreamAddr::UNLINK != 0).then(|| path.to_path_buf())
}

/// Skip the extension headers sitting between the fixed header and the
/// comment.  A zero type terminates the chain; unknown types are skipped.
fn walk_extensions(file: &mut File, header_offset: u32) -> Result<()> {
    loop {
        let ext = FileExtension::read_from(file)?;
        if ext.ext_type == HEADER_EXT_NONE {
            return Ok(());
        }
        match ext.ext_type {
            HEADER_EXT_PADDING => {}
            other => debug!("unrecognised extension header type {other}, ignored"),
        }

        // reject offsets that cannot be stepped over (malformed files)
        let next = ext.next_offset as usize;
        if next < FILE_EXTENSION_SIZE || next as u32 > header_offset {
            return Err(Error::CapfileInvalid);
        }
        file.seek(SeekFrom::Current((next - FILE_EXTENSION_SIZE) as i64))?;
    }
}
