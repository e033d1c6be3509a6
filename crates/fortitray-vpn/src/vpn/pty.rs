//! Pseudo-terminal channel.
//!
//! The client only emits its interactive prompts when it believes it is
//! talking to a terminal, so the process is spawned on a native pty pair
//! and its output is scanned as a raw byte stream.

use crate::vpn::channel::{ExpectOutcome, VpnChannel};
use crate::vpn::types::{VpnError, VpnErrorKind};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// ASCII ETX – what the terminal line discipline turns into SIGINT for the
/// foreground process group. Works even when the child runs with elevated
/// privileges, where a direct `kill(2)` from this process would not.
const INTR: &[u8] = b"\x03";

const READ_CHUNK: usize = 4096;

/// A client process attached to a pty, with marker scanning over its output.
pub struct PtyChannel {
    master: Option<Box<dyn MasterPty + Send>>,
    child: Box<dyn Child + Send + Sync>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    /// Rolling scan buffer of output not yet consumed by a marker match.
    buffer: String,
    eof: bool,
    closed: bool,
}

impl PtyChannel {
    /// Spawn `program` with `args` on a fresh pty. No read timeout is
    /// configured anywhere on the channel; the elevation dialog can keep
    /// the first read blocked for as long as the human takes.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, VpnError> {
        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                VpnError::new(VpnErrorKind::SpawnFailed, "failed to open pty")
                    .with_detail(e.to_string())
            })?;

        let mut cmd = CommandBuilder::new(program);
        for a in args {
            cmd.arg(a);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            VpnError::new(
                VpnErrorKind::SpawnFailed,
                format!("failed to spawn {}", program),
            )
            .with_detail(e.to_string())
        })?;
        // The slave side belongs to the child now; keeping it open here
        // would mask EOF on the master reader.
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(|e| {
            VpnError::new(VpnErrorKind::IoError, "failed to clone pty reader")
                .with_detail(e.to_string())
        })?;
        let writer = pair.master.take_writer().map_err(|e| {
            VpnError::new(VpnErrorKind::IoError, "failed to take pty writer")
                .with_detail(e.to_string())
        })?;

        Ok(Self {
            master: Some(pair.master),
            child,
            reader,
            writer,
            buffer: String::new(),
            eof: false,
            closed: false,
        })
    }

    /// If any marker is present in the buffer, consume through the earliest
    /// match and return its pattern index.
    fn match_buffered(&mut self, markers: &[&str]) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None; // (byte pos, marker idx)
        for (idx, marker) in markers.iter().enumerate() {
            if let Some(pos) = self.buffer.find(marker) {
                if best.map_or(true, |(bpos, _)| pos < bpos) {
                    best = Some((pos, idx));
                }
            }
        }
        let (pos, idx) = best?;
        self.buffer.drain(..pos + markers[idx].len());
        Some(idx)
    }
}

impl VpnChannel for PtyChannel {
    fn expect(&mut self, markers: &[&str]) -> ExpectOutcome {
        loop {
            // Scan what we already have first: one read can carry more
            // than one marker.
            if let Some(idx) = self.match_buffered(markers) {
                return ExpectOutcome::Marker(idx);
            }
            if self.eof {
                return ExpectOutcome::Eof;
            }
            let mut chunk = [0u8; READ_CHUNK];
            match self.reader.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self
                    .buffer
                    .push_str(&String::from_utf8_lossy(&chunk[..n])),
                // A read error on a pty means the child went away; the exit
                // itself is the only failure signal we act on.
                Err(_) => self.eof = true,
            }
        }
    }

    fn send_line(&mut self, line: &str) -> Result<(), VpnError> {
        let write = self
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        write.map_err(|e| {
            VpnError::new(VpnErrorKind::IoError, "failed to write to client")
                .with_detail(e.to_string())
        })
    }

    fn interrupt(&mut self) -> Result<(), VpnError> {
        if self.closed {
            return Err(VpnError::new(
                VpnErrorKind::ChannelClosed,
                "client process already released",
            ));
        }
        self.writer
            .write_all(INTR)
            .and_then(|_| self.writer.flush())
            .map_err(|e| {
                VpnError::new(VpnErrorKind::IoError, "failed to interrupt client")
                    .with_detail(e.to_string())
            })
    }

    fn wait_exit(&mut self, grace: Duration) -> Option<i32> {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status.exit_code() as i32),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(_) => return None,
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        // Dropping the master releases the terminal.
        self.master = None;
    }

    fn process_id(&self) -> Option<u32> {
        if self.closed {
            None
        } else {
            self.child.process_id()
        }
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        self.close();
    }
}
