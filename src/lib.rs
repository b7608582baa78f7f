/*!
 * pubsub-logger - long-running recorder for pubsub channels
 *
 * Subscribes to a configured set of channels through an external pubsub
 * transport daemon and records every message to per-channel, per-day
 * append-only text logs:
 * - Transport discovery from the live process table
 * - Domain-style channel names resolved through text records
 * - CBOR payload decoding with sensitive fields stripped
 * - One self-healing supervisor per channel with a fixed retry interval
 * - Read-only HTTP browser over the log tree
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod config;
pub mod decoder;
pub mod error;
pub mod fleet;
pub mod log_writer;
pub mod logging;
pub mod resolver;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types
pub use config::{ChannelConfig, LogLevel, LoggerConfig};
pub use decoder::{decode_envelope, Record};
pub use error::{LoggerError, Result};
pub use fleet::{ChannelPhase, Fleet, FleetOrchestrator};
pub use log_writer::LogWriter;
pub use resolver::NameResolver;
pub use supervisor::{ChannelState, ChannelSupervisor, ResolvedChannel, SupervisorSnapshot};
pub use transport::{SubscriptionLauncher, TransportLocator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
