//! Transport daemon plumbing
//!
//! The pubsub transport is an external daemon driven through its command
//! line. This module finds its executable, launches one `pubsub sub` child
//! per channel and queries bandwidth counters.

pub mod locator;
pub mod stats;
pub mod subscription;

pub use locator::{
    locator_from_config, select_executable, FixedLocator, ProcessEntry, ProcessTableLocator,
    TransportLocator,
};
pub use stats::bandwidth_stats;
pub use subscription::{
    subscribe_args, DaemonLauncher, ExitReport, SubscribeRequest, Subscription,
    SubscriptionLauncher,
};
