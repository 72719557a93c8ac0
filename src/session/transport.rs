//! Reading one byte of session output with a deadline.
//!
//! Two implementations: [`PollSource`] waits on the descriptor with
//! `poll(2)` and reads synchronously; [`QueuedSource`] moves the blocking
//! reads to a background thread that feeds a channel. Unix builds use the
//! former, other platforms the latter.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest single wait, so the caller's loop re-checks its deadline.
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Outcome of one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Byte(u8),
    /// Nothing arrived before the wait ended.
    Pending,
    /// The process closed its output.
    Eof,
}

/// The output side of a session.
pub trait ByteSource: Send {
    /// Wait until a byte arrives, the output closes, or the wait ends.
    /// Returns [`ReadStatus::Pending`] no later than `deadline`, possibly
    /// earlier.
    fn read_byte(&mut self, deadline: Instant) -> io::Result<ReadStatus>;

    /// Release the underlying stream. Safe to call more than once.
    fn close(&mut self);
}

fn wait_for(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        None
    } else {
        Some(remaining.min(MAX_WAIT))
    }
}

#[cfg(unix)]
pub use self::poll::PollSource;

#[cfg(unix)]
mod poll {
    use super::{wait_for, ByteSource, ReadStatus};
    use std::fs::File;
    use std::io::{self, Read};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::time::Instant;

    /// Synchronous reads gated by `poll(2)`.
    pub struct PollSource {
        file: Option<File>,
    }

    impl PollSource {
        pub fn new(fd: OwnedFd) -> Self {
            Self {
                file: Some(File::from(fd)),
            }
        }
    }

    impl ByteSource for PollSource {
        fn read_byte(&mut self, deadline: Instant) -> io::Result<ReadStatus> {
            let Some(file) = self.file.as_mut() else {
                return Ok(ReadStatus::Eof);
            };
            let Some(wait) = wait_for(deadline) else {
                return Ok(ReadStatus::Pending);
            };
            let mut pfd = libc::pollfd {
                fd: file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let timeout_ms = wait.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
            // SAFETY: `pfd` is a valid pollfd for the duration of the call
            // and the count matches.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    io::ErrorKind::Interrupted => Ok(ReadStatus::Pending),
                    _ => Err(err),
                };
            }
            if rc == 0 {
                return Ok(ReadStatus::Pending);
            }
            let mut byte = [0u8; 1];
            match file.read(&mut byte) {
                Ok(0) => Ok(ReadStatus::Eof),
                Ok(_) => Ok(ReadStatus::Byte(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadStatus::Pending),
                // a pty master reports EIO once the slave side is gone
                Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(ReadStatus::Eof),
                Err(e) => Err(e),
            }
        }

        fn close(&mut self) {
            self.file = None;
        }
    }
}

/// Blocking reads on a background thread, one byte per message.
pub struct QueuedSource {
    rx: Option<Receiver<Option<u8>>>,
    reader: Option<JoinHandle<()>>,
    /// Disconnects when the reader thread finishes.
    done: Receiver<()>,
}

impl QueuedSource {
    pub fn new<R: Read + Send + 'static>(mut stream: R) -> Self {
        let (tx, rx) = channel::unbounded();
        let (done_tx, done) = channel::bounded::<()>(0);
        let reader = thread::spawn(move || {
            let _done = done_tx;
            let mut byte = [0u8; 1];
            loop {
                match stream.read(&mut byte) {
                    Ok(1) => {
                        if tx.send(Some(byte[0])).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    _ => {
                        let _ = tx.send(None);
                        break;
                    }
                }
            }
        });
        Self {
            rx: Some(rx),
            reader: Some(reader),
            done,
        }
    }
}

impl ByteSource for QueuedSource {
    fn read_byte(&mut self, deadline: Instant) -> io::Result<ReadStatus> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(ReadStatus::Eof);
        };
        let Some(wait) = wait_for(deadline) else {
            return Ok(ReadStatus::Pending);
        };
        match rx.recv_timeout(wait) {
            Ok(Some(b)) => Ok(ReadStatus::Byte(b)),
            Ok(None) | Err(RecvTimeoutError::Disconnected) => Ok(ReadStatus::Eof),
            Err(RecvTimeoutError::Timeout) => Ok(ReadStatus::Pending),
        }
    }

    fn close(&mut self) {
        // the reader sees end of stream once every writer is gone
        self.rx = None;
        let Some(reader) = self.reader.take() else {
            return;
        };
        match self.done.recv_timeout(MAX_WAIT) {
            Err(RecvTimeoutError::Timeout) => {
                debug!("session output still open, leaving its reader thread behind");
            }
            _ => {
                let _ = reader.join();
            }
        }
    }
}

impl Drop for QueuedSource {
    fn drop(&mut self) {
        self.close();
    }
}
