//! Blocking byte and bulk I/O on raw descriptors.
//!
//! Interrupted calls are retried here and never reach the caller. A
//! non-blocking descriptor that has nothing to offer yields
//! [`Transfer::WouldBlock`] rather than an error.

use std::io;
use std::os::unix::io::RawFd;

use tracing::{trace, warn};

/// Result of a single-byte read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadByte {
    Byte(u8),
    Eof,
    WouldBlock,
}

/// Result of a write or bulk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Number of bytes moved; zero on end of file for reads.
    Done(usize),
    WouldBlock,
}

fn retry<F>(mut op: F) -> io::Result<Option<usize>>
where
    F: FnMut() -> isize,
{
    loop {
        let rc = op();
        if rc >= 0 {
            return Ok(Some(rc as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(None),
            _ => return Err(err),
        }
    }
}

pub fn read_byte(fd: RawFd) -> io::Result<ReadByte> {
    trace!(fd, "read byte");
    let mut ch = 0u8;
    match retry(|| unsafe { libc::read(fd, (&mut ch as *mut u8).cast(), 1) })? {
        Some(0) => Ok(ReadByte::Eof),
        Some(_) => Ok(ReadByte::Byte(ch)),
        None => Ok(ReadByte::WouldBlock),
    }
}

pub fn write_byte(fd: RawFd, byte: u8) -> io::Result<Transfer> {
    trace!(fd, byte, "write byte");
    match retry(|| unsafe { libc::write(fd, (&byte as *const u8).cast(), 1) }) {
        Ok(Some(n)) => Ok(Transfer::Done(n)),
        Ok(None) => Ok(Transfer::WouldBlock),
        Err(e) => {
            warn!(fd, errno = e.raw_os_error(), error = %e, "write byte failed");
            Err(e)
        }
    }
}

pub fn read_bytes(fd: RawFd, buf: &mut [u8]) -> io::Result<Transfer> {
    trace!(fd, len = buf.len(), "read");
    match retry(|| unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) }) {
        Ok(Some(n)) => Ok(Transfer::Done(n)),
        Ok(None) => {
            trace!(fd, "read would have blocked: needs retry");
            Ok(Transfer::WouldBlock)
        }
        Err(e) => {
            warn!(fd, errno = e.raw_os_error(), error = %e, "read error");
            Err(e)
        }
    }
}

/// Write as much of `buf` as the descriptor accepts. A closed reader shows
/// up as an error of kind [`io::ErrorKind::BrokenPipe`].
pub fn write_bytes(fd: RawFd, buf: &[u8]) -> io::Result<Transfer> {
    trace!(fd, len = buf.len(), "write");
    match retry(|| unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) }) {
        Ok(Some(n)) => Ok(Transfer::Done(n)),
        Ok(None) => {
            trace!(fd, "write would have blocked: needs retry");
            Ok(Transfer::WouldBlock)
        }
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            trace!(fd, "write with nobody to read it");
            Err(e)
        }
        Err(e) => {
            warn!(fd, errno = e.raw_os_error(), error = %e, "write error");
            Err(e)
        }
    }
}
