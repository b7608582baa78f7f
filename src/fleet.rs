//! Fleet Orchestrator: one supervisor per configured channel
//!
//! Channels start independently. Each one gets its log directory, has its
//! address resolved when it is domain-style, and then hands over to its own
//! [`ChannelSupervisor`]. A channel that fails to start is reported and left
//! alone; its siblings are unaffected.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use pubsub_logger_browser::StatusProvider;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{ChannelConfig, LoggerConfig};
use crate::error::{LoggerError, Result};
use crate::log_writer::LogWriter;
use crate::resolver::NameResolver;
use crate::supervisor::{ChannelSupervisor, ResolvedChannel, SupervisorSnapshot};
use crate::transport::{bandwidth_stats, SubscriptionLauncher, TransportLocator};

/// Startup progress of one channel
#[derive(Debug, Clone)]
pub enum ChannelPhase {
    /// Preparing the log directory and resolving the address
    Starting,

    /// Startup failed; the channel is not recorded
    Failed { reason: String },

    /// Supervisor running
    Supervising {
        channel_id: String,
        status: watch::Receiver<SupervisorSnapshot>,
    },
}

impl ChannelPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelPhase::Starting => "starting",
            ChannelPhase::Failed { .. } => "failed",
            ChannelPhase::Supervising { .. } => "supervising",
        }
    }
}

/// Serializable view of one channel for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub phase: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<SupervisorSnapshot>,
}

/// Starts a supervisor for every configured channel
pub struct FleetOrchestrator {
    channels: Vec<ChannelConfig>,
    record_key: String,
    resolver: Arc<dyn NameResolver>,
    locator: Arc<dyn TransportLocator>,
    launcher: Arc<dyn SubscriptionLauncher>,
    writer: LogWriter,
    retry_interval: Duration,
}

impl FleetOrchestrator {
    pub fn new(
        config: &LoggerConfig,
        resolver: Arc<dyn NameResolver>,
        locator: Arc<dyn TransportLocator>,
        launcher: Arc<dyn SubscriptionLauncher>,
    ) -> Self {
        Self {
            channels: config.channels.clone(),
            record_key: config.resolver.record_key.clone(),
            resolver,
            locator,
            launcher,
            writer: LogWriter::new(&config.log_dir),
            retry_interval: config.retry_interval(),
        }
    }

    /// Kick off every channel concurrently and return immediately
    pub fn start(self) -> Fleet {
        let locator = self.locator.clone();
        let orchestrator = Arc::new(self);

        let channels = orchestrator
            .channels
            .iter()
            .cloned()
            .map(|config| {
                let (phase_tx, phase_rx) = watch::channel(ChannelPhase::Starting);
                let orchestrator = orchestrator.clone();
                let channel = config.clone();
                tokio::spawn(async move {
                    orchestrator.start_channel(channel, phase_tx).await;
                });
                FleetChannel {
                    config,
                    phase: phase_rx,
                }
            })
            .collect();

        Fleet { channels, locator }
    }

    async fn start_channel(&self, channel: ChannelConfig, phase: watch::Sender<ChannelPhase>) {
        match self.prepare(&channel).await {
            Ok(resolved) => {
                let channel_id = resolved.channel_id.clone();
                let supervisor = ChannelSupervisor::new(
                    resolved,
                    self.locator.clone(),
                    self.launcher.clone(),
                    self.writer.clone(),
                    self.retry_interval,
                );
                let handle = supervisor.spawn();
                info!(
                    address = %channel.address,
                    channel_id = %channel_id,
                    "started logging {}",
                    channel.label()
                );
                phase.send_replace(ChannelPhase::Supervising {
                    channel_id,
                    status: handle.watch(),
                });
            }
            Err(e) => {
                error!(address = %channel.address, "failed start logging {}: {}", channel.label(), e);
                phase.send_replace(ChannelPhase::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Log directory first, then the channel identifier
    async fn prepare(&self, channel: &ChannelConfig) -> Result<ResolvedChannel> {
        self.writer.ensure_channel_dir(&channel.address).await?;

        let channel_id = if channel.is_domain() {
            self.resolver
                .resolve(&channel.address, &self.record_key)
                .await
                .map_err(LoggerError::from)?
        } else {
            channel.address.clone()
        };

        Ok(ResolvedChannel {
            address: channel.address.clone(),
            channel_id,
            display_name: channel.display_name.clone(),
        })
    }
}

struct FleetChannel {
    config: ChannelConfig,
    phase: watch::Receiver<ChannelPhase>,
}

/// Running fleet: per-channel phases for reporting
pub struct Fleet {
    channels: Vec<FleetChannel>,
    locator: Arc<dyn TransportLocator>,
}

impl Fleet {
    /// Wait until every channel has either failed or started supervising
    pub async fn wait_started(&self) {
        join_all(self.channels.iter().map(|channel| {
            let mut phase = channel.phase.clone();
            async move {
                // Err only if the startup task vanished, which leaves nothing to wait for
                let _ = phase
                    .wait_for(|p| !matches!(p, ChannelPhase::Starting))
                    .await;
            }
        }))
        .await;
    }

    pub fn phase(&self, address: &str) -> Option<ChannelPhase> {
        self.channels
            .iter()
            .find(|c| c.config.address == address)
            .map(|c| c.phase.borrow().clone())
    }

    pub fn channel_statuses(&self) -> Vec<ChannelStatus> {
        self.channels
            .iter()
            .map(|channel| {
                let phase = channel.phase.borrow().clone();
                let mut status = ChannelStatus {
                    address: channel.config.address.clone(),
                    display_name: channel.config.display_name.clone(),
                    phase: phase.name(),
                    channel_id: None,
                    error: None,
                    supervisor: None,
                };
                match phase {
                    ChannelPhase::Starting => {}
                    ChannelPhase::Failed { reason } => status.error = Some(reason),
                    ChannelPhase::Supervising {
                        channel_id,
                        status: snapshot,
                    } => {
                        status.channel_id = Some(channel_id);
                        status.supervisor = Some(snapshot.borrow().clone());
                    }
                }
                status
            })
            .collect()
    }
}

#[async_trait]
impl StatusProvider for Fleet {
    async fn status(&self) -> serde_json::Value {
        let transport = match self.locator.locate().await {
            Ok(executable) => {
                let bandwidth = match bandwidth_stats(&executable).await {
                    Ok(stats) => json!(stats),
                    Err(e) => json!({ "error": e.to_string() }),
                };
                json!({ "executable": executable.display().to_string(), "bandwidth": bandwidth })
            }
            Err(e) => json!({ "error": e.to_string() }),
        };

        let channels = serde_json::to_value(self.channel_statuses())
            .unwrap_or_else(|e| json!({ "error": e.to_string() }));

        json!({
            "channels": channels,
            "transport": transport,
        })
    }
}

/// Run the log browser next to a started fleet until `shutdown` completes.
///
/// The browser is a side channel: if it fails to bind or stops serving, the
/// failure is logged and recording carries on until shutdown.
pub async fn serve_until_shutdown<B, E, S>(browser: B, shutdown: S)
where
    B: Future<Output = std::result::Result<(), E>>,
    E: Display,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    tokio::select! {
        result = browser => match result {
            Ok(()) => warn!("Log browser stopped; recording continues"),
            Err(e) => error!("Log browser failed: {}; recording continues", e),
        },
        _ = &mut shutdown => return,
    }
    shutdown.await;
}
