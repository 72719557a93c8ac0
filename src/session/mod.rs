//! Interactive sessions with a collaborator process.
//!
//! A [`Session`] owns one spawned process: the runtime under test in REPL
//! mode, or a transient AOT compile. Commands are written as lines; output is
//! accumulated until one of the expected prompts appears, and the text before
//! the prompt is handed back. Reads are bounded by a wall-clock deadline; a
//! timed-out read leaves the process running and its output buffered.

mod spawn;
pub mod transport;

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use transport::{ByteSource, ReadStatus};

/// Line sent to ask the REPL to quit before the process is killed.
const EXIT_COMMAND: &str = "__exit__";

/// How stdio is connected to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// A pseudo-terminal; the process sees an interactive terminal and input
    /// is echoed back.
    Pty,
    /// Plain pipes with stderr merged into stdout.
    Pipe,
}

/// A session could not deliver the expected output.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("session I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Did not one of following prompt(s): {prompts:?}\n    Got      : {buffered:?}")]
    Timeout { prompts: Vec<String>, buffered: String },

    #[error("session closed before prompt(s) {prompts:?}\n    Got      : {buffered:?}")]
    Closed { prompts: Vec<String>, buffered: String },

    #[error("get nothing from session while a result was required")]
    NoOutput { buffered: String },

    #[error("session already terminated")]
    Terminated,
}

impl SessionError {
    /// Output captured before the failure, if any.
    pub fn buffered(&self) -> Option<&str> {
        match self {
            SessionError::Timeout { buffered, .. }
            | SessionError::Closed { buffered, .. }
            | SessionError::NoOutput { buffered } => Some(buffered),
            _ => None,
        }
    }
}

/// Append-only record of every byte read from any session.
#[derive(Clone)]
pub struct Transcript(Arc<Mutex<File>>);

impl Transcript {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self(Arc::new(Mutex::new(file))))
    }

    fn record(&self, bytes: &[u8]) {
        let mut file = self.0.lock();
        if let Err(e) = file.write_all(bytes).and_then(|()| file.flush()) {
            warn!("failed to write debug transcript: {e}");
        }
    }
}

/// One live collaborator process plus its pending output.
pub struct Session {
    label: String,
    transport: Transport,
    child: Option<Child>,
    input: Option<Box<dyn Write + Send>>,
    output: Option<Box<dyn ByteSource>>,
    buffer: String,
    partial: Vec<u8>,
    transcript: Option<Transcript>,
}

impl Session {
    /// Launch `args` and connect to it.
    pub fn launch(args: &[String], transport: Transport, transcript: Option<Transcript>) -> Result<Self, SessionError> {
        info!("Running: {}", args.join(" "));
        let program = args.first().cloned().unwrap_or_default();
        let spawned = spawn::spawn(args, transport).map_err(|source| SessionError::Spawn {
            program: program.clone(),
            source,
        })?;
        debug!(pid = spawned.child.id(), "session started");
        Ok(Self {
            label: program,
            transport,
            child: Some(spawned.child),
            input: Some(spawned.input),
            output: Some(spawned.output),
            buffer: String::new(),
            partial: Vec::new(),
            transcript,
        })
    }

    /// Output read but not yet consumed by a prompt match.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Whether the process has been neither terminated nor seen to exit.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!(session = %self.label, %status, "session exited");
                false
            }
            Some(Err(e)) => {
                warn!(session = %self.label, "failed to poll session: {e}");
                false
            }
            None => false,
        }
    }

    /// Write `line` followed by a newline.
    pub fn writeline(&mut self, line: &str) -> Result<(), SessionError> {
        let input = self.input.as_mut().ok_or(SessionError::Terminated)?;
        input.write_all(line.as_bytes())?;
        input.write_all(b"\n")?;
        input.flush()?;
        Ok(())
    }

    /// Read until the buffer contains one of `prompts`, returning the text
    /// before the first prompt found and keeping the text after it.
    pub fn read_to_prompt(&mut self, prompts: &[&str], timeout: Duration) -> Result<String, SessionError> {
        let deadline = Instant::now() + timeout;
        if let Some(head) = self.take_through_prompt(prompts, false) {
            return Ok(head);
        }
        loop {
            if Instant::now() >= deadline {
                debug!("left read_to_prompt() because of timeout");
                return Err(SessionError::Timeout {
                    prompts: owned(prompts),
                    buffered: self.buffer.clone(),
                });
            }
            let output = self.output.as_mut().ok_or(SessionError::Terminated)?;
            match output.read_byte(deadline)? {
                ReadStatus::Byte(b) => {
                    if self.push_byte(b) {
                        if let Some(head) = self.take_through_prompt(prompts, true) {
                            return Ok(head);
                        }
                    }
                }
                ReadStatus::Pending => {}
                ReadStatus::Eof => {
                    return Err(SessionError::Closed {
                        prompts: owned(prompts),
                        buffered: self.buffer.clone(),
                    })
                }
            }
        }
    }

    /// Wait for a start-up prompt.
    ///
    /// With `required`, an empty header before the prompt is an error.
    pub fn assert_prompt(&mut self, prompts: &[&str], timeout: Duration, required: bool) -> Result<String, SessionError> {
        match self.read_to_prompt(prompts, timeout) {
            Ok(header) if header.is_empty() && required => {
                info!(" ---------- will terminate cause the case needs result while there is none inside of buf. ----------");
                Err(SessionError::NoOutput {
                    buffered: self.buffer.clone(),
                })
            }
            Ok(header) => {
                if !header.is_empty() {
                    info!("Started with:\n{header}");
                }
                Ok(header)
            }
            Err(e) => {
                info!("Did not one of following prompt(s): {prompts:?}");
                info!("    Got      : {:?}", e.buffered().unwrap_or_default());
                Err(e)
            }
        }
    }

    /// Send one REPL command and return everything printed before the next
    /// prompt.
    pub fn invoke(&mut self, command: &str, prompt: &str, timeout: Duration) -> Result<String, SessionError> {
        self.writeline(command)?;
        let crlf = format!("\r\n{prompt}");
        let lf = format!("\n{prompt}");
        self.read_to_prompt(&[&crlf, &lf], timeout)
    }

    /// Append one byte; returns whether a character was completed.
    fn push_byte(&mut self, byte: u8) -> bool {
        if let Some(transcript) = &self.transcript {
            transcript.record(&[byte]);
        }
        self.partial.push(byte);
        let text = match std::str::from_utf8(&self.partial) {
            Ok(s) => s.to_string(),
            // a multi-byte character still in flight
            Err(e) if e.error_len().is_none() && self.partial.len() < 4 => return false,
            Err(_) => String::from_utf8_lossy(&self.partial).into_owned(),
        };
        self.partial.clear();
        for c in text.chars() {
            if c == '\n' && self.transport == Transport::Pipe {
                self.push_char('\r');
            }
            self.push_char(c);
        }
        true
    }

    /// Push a character, collapsing `\r\r` to `\r`.
    fn push_char(&mut self, c: char) {
        if c == '\r' && self.buffer.ends_with('\r') {
            return;
        }
        self.buffer.push(c);
    }

    /// Split the buffer at the first prompt found. With `at_end`, only a
    /// prompt ending the buffer is considered.
    fn take_through_prompt(&mut self, prompts: &[&str], at_end: bool) -> Option<String> {
        for prompt in prompts {
            let found = if at_end {
                self.buffer.ends_with(prompt).then(|| self.buffer.len() - prompt.len())
            } else {
                self.buffer.find(prompt)
            };
            if let Some(start) = found {
                let rest = self.buffer.split_off(start + prompt.len());
                self.buffer.truncate(start);
                return Some(std::mem::replace(&mut self.buffer, rest));
            }
        }
        None
    }

    /// Stop the process and close both channel ends. Safe to call more than
    /// once.
    pub fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(session = %self.label, "terminating session");
            if self.writeline(EXIT_COMMAND).is_ok() {
                thread::sleep(Duration::from_millis(20));
            }
            let _ = child.kill();
            let _ = child.wait();
        }
        self.input = None;
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// The result line of an invocation: the last line of `output`, after
/// dropping a terminal echo of `command`. Empty when the echo is all there
/// is.
pub fn result_line(output: &str, command: &str) -> String {
    let mut lines = output.split('\n').map(|l| l.trim_end_matches('\r')).peekable();
    if lines.peek().is_some_and(|first| first.trim_end() == command.trim_end()) {
        lines.next();
    }
    lines.last().map(str::to_string).unwrap_or_default()
}

fn owned(prompts: &[&str]) -> Vec<String> {
    prompts.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    const REPL: &str = r#"printf 'webassembly> '; while read line; do case "$line" in __exit__) exit 0;; *) printf '%s\nwebassembly> ' "$line";; esac; done"#;

    #[rstest]
    #[case("add 1 2\r\n0x3:i32", "add 1 2", "0x3:i32")]
    #[case("0x3:i32", "add 1 2", "0x3:i32")]
    #[case("Exception: integer divide by zero", "div 1 0", "Exception: integer divide by zero")]
    #[case("f\r\n", "f", "")]
    #[case("nop", "nop", "")]
    #[case("nop1 1\r", "nop1 1", "")]
    #[case("", "f", "")]
    #[case("noise\r\n0x1:i32,0x2:i64", "g", "0x1:i32,0x2:i64")]
    fn result_lines(#[case] output: &str, #[case] command: &str, #[case] expected: &str) {
        assert_eq!(result_line(output, command), expected);
    }

    #[cfg(unix)]
    #[test]
    fn invoke_reads_up_to_prompt() {
        let mut session = Session::launch(&sh(REPL), Transport::Pipe, None).unwrap();
        let header = session.assert_prompt(&["webassembly> "], Duration::from_secs(10), false).unwrap();
        assert_eq!(header, "");
        let out = session.invoke("add 1 2", "webassembly> ", Duration::from_secs(10)).unwrap();
        assert_eq!(out, "add 1 2");
        assert_eq!(session.buffer(), "");
        session.terminate();
        session.terminate();
        assert!(!session.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn required_result_with_empty_header_fails() {
        let mut session = Session::launch(&sh(REPL), Transport::Pipe, None).unwrap();
        let err = session.assert_prompt(&["webassembly> "], Duration::from_secs(10), true).unwrap_err();
        assert!(matches!(err, SessionError::NoOutput { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_keeps_process_and_buffer() {
        let mut session = Session::launch(&sh("printf 'loading'; sleep 5"), Transport::Pipe, None).unwrap();
        let err = session.read_to_prompt(&["webassembly> "], Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert_eq!(err.buffered(), Some("loading"));
        assert!(session.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn closed_output_is_reported_with_buffer() {
        let mut session = Session::launch(&sh("echo 'magic header not detected'"), Transport::Pipe, None).unwrap();
        let err = session.assert_prompt(&["Compile success"], Duration::from_secs(10), true).unwrap_err();
        assert!(matches!(err, SessionError::Closed { .. }));
        assert_eq!(err.buffered(), Some("magic header not detected\r\n"));
    }

    #[cfg(unix)]
    #[test]
    fn pipe_newlines_become_crlf_without_doubling() {
        let mut session = Session::launch(&sh(r"printf 'a\r\nb\nEND'"), Transport::Pipe, None).unwrap();
        let head = session.read_to_prompt(&["END"], Duration::from_secs(10)).unwrap();
        assert_eq!(head, "a\r\nb\r\n");
    }

    #[cfg(unix)]
    #[test]
    fn transcript_records_raw_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let transcript = Transcript::open(&path).unwrap();
        let mut session = Session::launch(&sh("printf 'hello> '"), Transport::Pipe, Some(transcript)).unwrap();
        session.read_to_prompt(&["> "], Duration::from_secs(10)).unwrap();
        drop(session);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello> ");
    }

    #[cfg(unix)]
    #[test]
    fn exited_process_is_not_running() {
        let mut session = Session::launch(&sh("printf 'bye> '"), Transport::Pipe, None).unwrap();
        session.read_to_prompt(&["bye> "], Duration::from_secs(10)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while session.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!session.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn pty_echo_is_dropped_from_the_result() {
        let mut session = Session::launch(&sh(REPL), Transport::Pty, None).unwrap();
        session.assert_prompt(&["webassembly> "], Duration::from_secs(10), false).unwrap();
        let out = session.invoke("add 1 2", "webassembly> ", Duration::from_secs(10)).unwrap();
        assert_eq!(result_line(&out, "add 1 2"), "add 1 2");
        assert!(!out.contains("\r\r"), "{out:?}");
        assert!(out.starts_with("add 1 2\r\n"), "{out:?}");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = Session::launch(&["/nonexistent/wastrun-tool".to_string()], Transport::Pipe, None).err().unwrap();
        assert!(matches!(err, SessionError::Spawn { .. }));
    }
}
