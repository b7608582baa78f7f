//! Channel Supervisor: the per-channel recovery loop
//!
//! Each supervisor owns exactly one subscription process at a time and
//! cycles through a fixed set of states forever:
//!
//! ```text
//!   ┌──────────────────────┐  locate() fails: sleep, retry
//!   │  AwaitingTransport   │◄───────────────┐
//!   └──────────┬───────────┘                │
//!              │ daemon found               │
//!   ┌──────────▼───────────┐                │
//!   │     Subscribing      │── launch error ┤
//!   └──────────┬───────────┘                │
//!              │ child started              │
//!   ┌──────────▼───────────┐                │
//!   │        Active        │ decode + append each stdout line
//!   └──────────┬───────────┘                │
//!              │ child exited               │
//!   ┌──────────▼───────────┐  sleep         │
//!   │        Exited        │────────────────┘
//!   └──────────────────────┘
//! ```
//!
//! No exit status is treated as permanent. A new child is only launched
//! after the previous one has been reaped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::decoder::{decode_envelope, Record};
use crate::log_writer::{AppendOutcome, LogWriter};
use crate::transport::{
    ExitReport, SubscribeRequest, Subscription, SubscriptionLauncher, TransportLocator,
};

/// Longest slice of an unparsed payload echoed to diagnostics
const PREVIEW_CHARS: usize = 200;

/// A channel with its identifier resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedChannel {
    /// Configured address; names the log directory
    pub address: String,
    /// Identifier actually subscribed to
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ResolvedChannel {
    pub fn new(address: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            channel_id: channel_id.into(),
            display_name: None,
        }
    }
}

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Looking for the transport daemon
    #[default]
    AwaitingTransport,

    /// Launching the subscription process
    Subscribing,

    /// Consuming subscription output
    Active,

    /// Subscription ended; waiting out the retry interval
    Exited,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::AwaitingTransport => "awaiting_transport",
            ChannelState::Subscribing => "subscribing",
            ChannelState::Active => "active",
            ChannelState::Exited => "exited",
        }
    }
}

/// Observable supervisor state, published on every transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorSnapshot {
    pub state: ChannelState,
    /// Subscription launches attempted so far
    pub attempts: u64,
    pub records_written: u64,
    pub executable: Option<PathBuf>,
    pub pid: Option<u32>,
    pub last_exit: Option<ExitReport>,
}

/// Owns the subscribe/decode/write lifecycle of one channel
pub struct ChannelSupervisor {
    channel: ResolvedChannel,
    locator: Arc<dyn TransportLocator>,
    launcher: Arc<dyn SubscriptionLauncher>,
    writer: LogWriter,
    retry_interval: Duration,
    status: watch::Sender<SupervisorSnapshot>,
}

impl ChannelSupervisor {
    pub fn new(
        channel: ResolvedChannel,
        locator: Arc<dyn TransportLocator>,
        launcher: Arc<dyn SubscriptionLauncher>,
        writer: LogWriter,
        retry_interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SupervisorSnapshot::default());
        Self {
            channel,
            locator,
            launcher,
            writer,
            retry_interval,
            status,
        }
    }

    pub fn channel(&self) -> &ResolvedChannel {
        &self.channel
    }

    pub fn status(&self) -> watch::Receiver<SupervisorSnapshot> {
        self.status.subscribe()
    }

    /// Run on its own task for the rest of the process lifetime
    pub fn spawn(self) -> SupervisorHandle {
        let channel = self.channel.clone();
        let status = self.status();
        let task = tokio::spawn(self.run());
        SupervisorHandle {
            channel,
            status,
            task,
        }
    }

    /// Recovery loop; never returns
    pub async fn run(self) {
        info!(
            address = %self.channel.address,
            channel_id = %self.channel.channel_id,
            "starting channel supervisor"
        );
        loop {
            self.run_cycle().await;
        }
    }

    /// One full pass: find the daemon, subscribe, consume until exit, back off
    pub async fn run_cycle(&self) {
        self.transition(ChannelState::AwaitingTransport);
        let executable = self.await_transport().await;

        self.status.send_modify(|s| {
            s.state = ChannelState::Subscribing;
            s.attempts += 1;
            s.executable = Some(executable.clone());
            s.pid = None;
        });

        let request = SubscribeRequest::new(
            executable,
            self.channel.channel_id.clone(),
            self.channel.address.clone(),
        );
        let command = request.command_line();

        let report = match self.launcher.launch(request).await {
            Ok(mut subscription) => {
                let pid = subscription.pid();
                self.status.send_modify(|s| {
                    s.state = ChannelState::Active;
                    s.pid = pid;
                });
                info!(address = %self.channel.address, pid = ?pid, "subscribed: {}", command);

                self.consume(subscription.as_mut()).await;
                let report = subscription.wait().await;
                info!(
                    address = %self.channel.address,
                    pid = ?pid,
                    "'{}' exited: {}", command, report.description
                );
                report
            }
            Err(e) => {
                error!(address = %self.channel.address, "failed to launch '{}': {}", command, e);
                ExitReport::failed(e.to_string())
            }
        };

        self.status.send_modify(|s| {
            s.state = ChannelState::Exited;
            s.pid = None;
            s.last_exit = Some(report);
        });
        tokio::time::sleep(self.retry_interval).await;
    }

    /// Poll the locator until the daemon shows up
    async fn await_transport(&self) -> PathBuf {
        loop {
            match self.locator.locate().await {
                Ok(executable) => return executable,
                Err(e) => {
                    warn!(
                        address = %self.channel.address,
                        "transport unavailable, retrying in {}s: {}",
                        self.retry_interval.as_secs(),
                        e
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Handle stdout lines in emission order until the stream closes
    async fn consume(&self, subscription: &mut dyn Subscription) {
        while let Some(line) = subscription.next_line().await {
            self.handle_line(&line).await;
        }
    }

    async fn handle_line(&self, line: &[u8]) {
        // Status output from the daemon is not an envelope; drop it quietly
        let Ok(record) = decode_envelope(line) else {
            return;
        };

        match &record {
            Record::Decoded(text) => debug!(address = %self.channel.address, "{}", text),
            Record::RawText(text) => debug!(
                address = %self.channel.address,
                "unparsed payload: {}",
                preview(text)
            ),
            Record::Unrepresentable(_) => {
                debug!(address = %self.channel.address, "dropping empty payload")
            }
        }

        match self.writer.append(&self.channel.address, &record).await {
            Ok(AppendOutcome::Written(_)) => {
                self.status.send_modify(|s| s.records_written += 1);
            }
            Ok(AppendOutcome::Skipped) => {}
            Err(e) => error!(address = %self.channel.address, "failed to write log: {}", e),
        }
    }

    fn transition(&self, state: ChannelState) {
        self.status.send_modify(|s| s.state = state);
        debug!(address = %self.channel.address, state = state.as_str(), "state change");
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Handle to a spawned supervisor
pub struct SupervisorHandle {
    channel: ResolvedChannel,
    status: watch::Receiver<SupervisorSnapshot>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn channel(&self) -> &ResolvedChannel {
        &self.channel
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SupervisorSnapshot> {
        self.status.clone()
    }

    /// Stop the supervisor; its subscription child is killed on drop
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
