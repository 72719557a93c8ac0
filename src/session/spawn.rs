//! Launching a session process over a pseudo-terminal or pipes.

use super::transport::ByteSource;
use super::Transport;
use std::io::{self, Write};
use std::process::{Child, Command};

/// A freshly launched process with its two channel ends.
pub struct Spawned {
    pub child: Child,
    pub input: Box<dyn Write + Send>,
    pub output: Box<dyn ByteSource>,
}

/// Environment that keeps line editors quiet.
const QUIET_ENV: [(&str, &str); 3] = [("TERM", "dumb"), ("INPUTRC", "/dev/null"), ("PERL_RL", "false")];

/// Pseudo-terminal size; wide enough that line editing never wraps.
#[cfg(unix)]
const PTY_ROWS: u16 = 100;
#[cfg(unix)]
const PTY_COLS: u16 = 200;

fn command(args: &[String]) -> io::Result<Command> {
    let Some((program, rest)) = args.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"));
    };
    let mut cmd = Command::new(program);
    cmd.args(rest).envs(QUIET_ENV);
    Ok(cmd)
}

/// Launch `args` with standard error merged into standard output.
pub fn spawn(args: &[String], transport: Transport) -> io::Result<Spawned> {
    let cmd = command(args)?;
    match transport {
        Transport::Pty => imp::spawn_pty(cmd),
        Transport::Pipe => imp::spawn_pipe(cmd),
    }
}

#[cfg(unix)]
mod imp {
    use super::{Spawned, PTY_COLS, PTY_ROWS};
    use crate::session::transport::PollSource;
    use std::fs::File;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};
    use std::ptr;

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn set_cloexec(fd: RawFd) -> io::Result<()> {
        // SAFETY: fcntl on a descriptor owned by the caller.
        check(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })
    }

    pub fn spawn_pty(mut cmd: Command) -> io::Result<Spawned> {
        let mut master: libc::c_int = -1;
        let mut slave: libc::c_int = -1;
        let mut size = libc::winsize {
            ws_row: PTY_ROWS,
            ws_col: PTY_COLS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: the out-pointers are valid for writes and the name and
        // termios arguments may be null.
        check(unsafe { libc::openpty(&mut master, &mut slave, ptr::null_mut(), ptr::null_mut(), &mut size) })?;
        // SAFETY: openpty succeeded, so both descriptors are open and owned
        // by nobody else.
        let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };
        set_cloexec(master.as_raw_fd())?;

        cmd.stdin(Stdio::from(slave.try_clone()?))
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave));
        // SAFETY: setsid is async-signal-safe.
        unsafe {
            cmd.pre_exec(|| check(libc::setsid()));
        }
        let child = cmd.spawn()?;
        // closes our copies of the slave, so reads see EIO when the child exits
        drop(cmd);

        let input = File::from(master.try_clone()?);
        Ok(Spawned {
            child,
            input: Box::new(input),
            output: Box::new(PollSource::new(master)),
        })
    }

    pub fn spawn_pipe(mut cmd: Command) -> io::Result<Spawned> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
        check(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        // SAFETY: pipe succeeded, so both descriptors are open and owned by
        // nobody else.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_cloexec(fds[0])?;
        set_cloexec(fds[1])?;

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::from(write.try_clone()?))
            .stderr(Stdio::from(write));
        let mut child = cmd.spawn()?;
        drop(cmd);

        let input = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child stdin unavailable"))?;
        Ok(Spawned {
            child,
            input: Box::new(input),
            output: Box::new(PollSource::new(read)),
        })
    }
}

#[cfg(not(unix))]
mod imp {
    use super::Spawned;
    use crate::session::transport::QueuedSource;
    use std::io;
    use std::process::{Command, Stdio};

    pub fn spawn_pty(cmd: Command) -> io::Result<Spawned> {
        spawn_pipe(cmd)
    }

    pub fn spawn_pipe(mut cmd: Command) -> io::Result<Spawned> {
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());
        let mut child = cmd.spawn()?;
        let missing = || io::Error::new(io::ErrorKind::BrokenPipe, "child stdio unavailable");
        let input = child.stdin.take().ok_or_else(missing)?;
        let output = child.stdout.take().ok_or_else(missing)?;
        Ok(Spawned {
            child,
            input: Box::new(input),
            output: Box::new(QueuedSource::new(output)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::ReadStatus;
    use std::time::{Duration, Instant};

    fn read_all(spawned: &mut Spawned) -> String {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::new();
        while Instant::now() < deadline {
            match spawned.output.read_byte(deadline).unwrap() {
                ReadStatus::Byte(b) => out.push(b),
                ReadStatus::Pending => {}
                ReadStatus::Eof => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn pipe_merges_stderr_and_sets_env() {
        let mut spawned = spawn(&sh("echo out; echo err >&2; echo $TERM"), Transport::Pipe).unwrap();
        let text = read_all(&mut spawned);
        spawned.child.wait().unwrap();
        assert_eq!(text, "out\nerr\ndumb\n");
    }

    #[cfg(unix)]
    #[test]
    fn pty_delivers_output_and_eof() {
        let mut spawned = spawn(&sh("read line; echo got $line"), Transport::Pty).unwrap();
        spawned.input.write_all(b"x\n").unwrap();
        spawned.input.flush().unwrap();
        let text = read_all(&mut spawned);
        spawned.child.wait().unwrap();
        assert!(text.contains("got x"), "{text:?}");
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(spawn(&[], Transport::Pipe).is_err());
    }
}
