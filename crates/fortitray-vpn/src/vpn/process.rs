//! Client invocation shape, binary discovery, and the production host.

use crate::vpn::channel::{ProcessHost, VpnChannel};
use crate::vpn::pty::PtyChannel;
use crate::vpn::types::{VpnError, VpnErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default privilege-elevation wrapper.
pub const DEFAULT_ELEVATION_TOOL: &str = "pkexec";
/// Default VPN client binary.
pub const DEFAULT_CLIENT_BINARY: &str = "openfortivpn";

/// Output marker that precedes the interactive password prompt.
pub const PASSWORD_PROMPT: &str = "VPN account password:";
/// Output marker emitted once the tunnel is up and traffic can flow.
pub const TUNNEL_UP: &str = "Tunnel is up and running.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Command spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How to invoke the external client and which markers to scan for.
///
/// The invocation shape is fixed for interoperability:
/// `<elevation-tool> <client> <server> -u <username>`. The password never
/// appears in the argument vector or the environment; it is supplied over
/// the interactive channel once the prompt marker shows up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Privilege-elevation wrapper (`pkexec`).
    pub elevation_tool: String,
    /// VPN client binary (`openfortivpn`).
    pub client_binary: String,
    pub server: String,
    pub username: String,
    /// Extra client arguments appended after `-u <username>`.
    pub extra_args: Vec<String>,
    /// Marker announcing the password prompt.
    pub password_prompt: String,
    /// Marker announcing an established tunnel.
    pub tunnel_marker: String,
}

impl CommandSpec {
    pub fn new(server: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            elevation_tool: DEFAULT_ELEVATION_TOOL.into(),
            client_binary: DEFAULT_CLIENT_BINARY.into(),
            server: server.into(),
            username: username.into(),
            extra_args: Vec::new(),
            password_prompt: PASSWORD_PROMPT.into(),
            tunnel_marker: TUNNEL_UP.into(),
        }
    }

    /// Program to execute (the elevation wrapper).
    pub fn program(&self) -> &str {
        &self.elevation_tool
    }

    /// Argument vector: `<client> <server> -u <username> [extra…]`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.client_binary.clone(),
            self.server.clone(),
            "-u".into(),
            self.username.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Full command line for logs and diagnostics.
    pub fn display_line(&self) -> String {
        let mut line = self.program().to_string();
        for a in self.args() {
            line.push(' ');
            line.push_str(&a);
        }
        line
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Binary discovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Well-known client locations checked when `PATH` lookup comes up empty.
fn default_client_paths(name: &str) -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin").join(name),
        PathBuf::from("/usr/local/bin").join(name),
        PathBuf::from("/usr/sbin").join(name),
        PathBuf::from("/opt/homebrew/bin").join(name),
    ]
}

/// Locate a client binary on this system.
pub fn find_client_binary(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(path);
    }
    default_client_paths(name).into_iter().find(|p| p.is_file())
}

/// Run `<binary> --version` and return the first non-empty output line.
pub async fn client_version(binary: &Path) -> Result<String, VpnError> {
    let output = tokio::process::Command::new(binary)
        .arg("--version")
        .output()
        .await
        .map_err(|e| {
            VpnError::new(VpnErrorKind::IoError, "failed to run client --version")
                .with_detail(e.to_string())
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{}\n{}", stdout, stderr);

    combined
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            VpnError::new(VpnErrorKind::ParseError, "client produced no version output")
        })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Production host
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawns the client under the elevation wrapper on a pseudo terminal.
pub struct PtyProcessHost;

impl ProcessHost for PtyProcessHost {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn VpnChannel>, VpnError> {
        let channel = PtyChannel::spawn(spec.program(), &spec.args())?;
        Ok(Box::new(channel))
    }
}
