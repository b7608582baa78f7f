//! Subscription subprocesses
//!
//! One `<daemon> pubsub sub <channel> --enc=json` child per channel. Its
//! stdout is consumed line by line by the owning supervisor; stderr is only
//! forwarded to diagnostics.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::SubscribeError;

/// Everything needed to start one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub executable: PathBuf,
    pub channel_id: String,
    /// Channel address, used to label diagnostics
    pub address: String,
}

impl SubscribeRequest {
    pub fn new(
        executable: impl Into<PathBuf>,
        channel_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            executable: executable.into(),
            channel_id: channel_id.into(),
            address: address.into(),
        }
    }

    /// Command line as it would be typed, for log messages
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        parts.extend(subscribe_args(&self.channel_id));
        parts.join(" ")
    }
}

/// Arguments of the subscribe command
pub fn subscribe_args(channel_id: &str) -> Vec<String> {
    vec![
        "pubsub".to_string(),
        "sub".to_string(),
        channel_id.to_string(),
        "--enc=json".to_string(),
    ]
}

/// How a subscription process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub description: String,
}

impl ExitReport {
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            description: status.to_string(),
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            code: None,
            description: description.into(),
        }
    }
}

/// A running subscription
#[async_trait]
pub trait Subscription: Send {
    /// OS process id, when there is one
    fn pid(&self) -> Option<u32>;

    /// Next non-empty stdout line without its line terminator.
    /// `None` once stdout is closed.
    async fn next_line(&mut self) -> Option<Vec<u8>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> ExitReport;
}

/// Starts subscriptions
#[async_trait]
pub trait SubscriptionLauncher: Send + Sync {
    async fn launch(&self, request: SubscribeRequest)
        -> Result<Box<dyn Subscription>, SubscribeError>;
}

/// Launches real daemon children with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct DaemonLauncher;

#[async_trait]
impl SubscriptionLauncher for DaemonLauncher {
    async fn launch(
        &self,
        request: SubscribeRequest,
    ) -> Result<Box<dyn Subscription>, SubscribeError> {
        let mut child = Command::new(&request.executable)
            .args(subscribe_args(&request.channel_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SubscribeError::Spawn {
                executable: request.executable.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(SubscribeError::MissingStdout)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(
                stderr,
                request.address.clone(),
                request.command_line(),
            ));
        }

        Ok(Box::new(ChildSubscription {
            child,
            stdout: BufReader::new(stdout),
            address: request.address,
        }))
    }
}

struct ChildSubscription {
    child: Child,
    stdout: BufReader<ChildStdout>,
    address: String,
}

#[async_trait]
impl Subscription for ChildSubscription {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let mut line = Vec::new();
            match self.stdout.read_until(b'\n', &mut line).await {
                Ok(0) => return None,
                Ok(_) => {
                    while matches!(line.last(), Some(b'\n' | b'\r')) {
                        line.pop();
                    }
                    if !line.is_empty() {
                        return Some(line);
                    }
                }
                Err(e) => {
                    warn!(address = %self.address, "failed reading subscription stdout: {}", e);
                    return None;
                }
            }
        }
    }

    async fn wait(&mut self) -> ExitReport {
        match self.child.wait().await {
            Ok(status) => ExitReport::from_status(status),
            Err(e) => {
                // Make sure nothing outlives this attempt
                let _ = self.child.kill().await;
                ExitReport::failed(format!("failed waiting for subscription process: {}", e))
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, address: String, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => warn!(address = %address, command = %command, "stderr: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(address = %address, "stopped reading subscription stderr: {}", e);
                break;
            }
        }
    }
}
