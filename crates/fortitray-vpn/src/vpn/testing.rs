//! Scripted process hosts for exercising the state machine without a pty.

use crate::vpn::channel::{ExpectOutcome, ProcessHost, VpnChannel};
use crate::vpn::process::CommandSpec;
use crate::vpn::types::{VpnError, VpnErrorKind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a scripted client behaves across successive `expect` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Prompt appears, then the tunnel marker. The well-behaved client.
    PromptThenTunnel,
    /// Prompt appears, then the stream ends. Bad credentials or a crash
    /// during negotiation.
    PromptThenEof,
    /// The stream ends before anything is printed. Dismissed elevation
    /// dialog or an immediate startup failure.
    EofAtOnce,
}

/// Everything a scripted channel was asked to do, shared with the test.
#[derive(Default)]
pub struct ChannelTrace {
    pub sent_lines: Mutex<Vec<String>>,
    pub interrupts: AtomicUsize,
    pub closed: AtomicBool,
}

/// A channel that answers `expect` from a script instead of a real stream.
pub struct ScriptedChannel {
    script: Script,
    expects: usize,
    trace: Arc<ChannelTrace>,
}

impl VpnChannel for ScriptedChannel {
    fn expect(&mut self, _markers: &[&str]) -> ExpectOutcome {
        let call = self.expects;
        self.expects += 1;
        match (self.script, call) {
            (Script::EofAtOnce, _) => ExpectOutcome::Eof,
            (Script::PromptThenEof, 0) => ExpectOutcome::Marker(0),
            (Script::PromptThenEof, _) => ExpectOutcome::Eof,
            (Script::PromptThenTunnel, 0 | 1) => ExpectOutcome::Marker(0),
            (Script::PromptThenTunnel, _) => ExpectOutcome::Eof,
        }
    }

    fn send_line(&mut self, line: &str) -> Result<(), VpnError> {
        self.trace
            .sent_lines
            .lock()
            .expect("trace lock poisoned")
            .push(line.to_string());
        Ok(())
    }

    fn interrupt(&mut self) -> Result<(), VpnError> {
        if self.trace.closed.load(Ordering::SeqCst) {
            return Err(VpnError::new(
                VpnErrorKind::ChannelClosed,
                "scripted channel already closed",
            ));
        }
        self.trace.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait_exit(&mut self, _grace: Duration) -> Option<i32> {
        Some(0)
    }

    fn close(&mut self) {
        self.trace.closed.store(true, Ordering::SeqCst);
    }

    fn process_id(&self) -> Option<u32> {
        if self.trace.closed.load(Ordering::SeqCst) {
            None
        } else {
            Some(4242)
        }
    }
}

/// Hands out scripted channels, or refuses to spawn at all.
pub struct ScriptedHost {
    script: Script,
    trace: Arc<ChannelTrace>,
    fail_spawn: bool,
}

impl ScriptedHost {
    pub fn new(script: Script, trace: Arc<ChannelTrace>) -> Self {
        Self {
            script,
            trace,
            fail_spawn: false,
        }
    }

    /// A host whose spawn always fails, as if the binary were missing.
    pub fn failing(trace: Arc<ChannelTrace>) -> Self {
        Self {
            script: Script::EofAtOnce,
            trace,
            fail_spawn: true,
        }
    }
}

impl ProcessHost for ScriptedHost {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn VpnChannel>, VpnError> {
        if self.fail_spawn {
            return Err(VpnError::new(
                VpnErrorKind::SpawnFailed,
                format!("failed to spawn {}", spec.program()),
            ));
        }
        Ok(Box::new(ScriptedChannel {
            script: self.script,
            expects: 0,
            trace: Arc::clone(&self.trace),
        }))
    }
}
