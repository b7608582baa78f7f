//! Scripted transport doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use indexmap::IndexMap;
use pubsub_logger::error::{LocateError, SubscribeError};
use pubsub_logger::transport::{
    ExitReport, SubscribeRequest, Subscription, SubscriptionLauncher, TransportLocator,
};
use serde_cbor::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const FAKE_DAEMON: &str = "/fake/bin/ipfs";

/// Fails a fixed number of times, then reports [`FAKE_DAEMON`]
pub struct FlakyLocator {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyLocator {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportLocator for FlakyLocator {
    async fn locate(&self) -> Result<PathBuf, LocateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(LocateError::NotFound {
                daemon: "ipfs".to_string(),
            });
        }
        Ok(PathBuf::from(FAKE_DAEMON))
    }
}

/// Every launch replays the same stdout lines
pub struct ScriptedLauncher {
    lines: Vec<Vec<u8>>,
    exit_code: i32,
    /// Keep the subscription open after the script instead of exiting
    hang: bool,
    launches: mpsc::UnboundedSender<(Instant, SubscribeRequest)>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new(
        lines: Vec<Vec<u8>>,
        exit_code: i32,
    ) -> (Self, mpsc::UnboundedReceiver<(Instant, SubscribeRequest)>) {
        let (launches, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            lines,
            exit_code,
            hang: false,
            launches,
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
        };
        (launcher, rx)
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn max_live(&self) -> Arc<AtomicUsize> {
        self.max_live.clone()
    }
}

#[async_trait]
impl SubscriptionLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        request: SubscribeRequest,
    ) -> Result<Box<dyn Subscription>, SubscribeError> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        let _ = self.launches.send((Instant::now(), request));

        Ok(Box::new(ScriptedSubscription {
            lines: self.lines.iter().cloned().collect(),
            exit_code: self.exit_code,
            hang: self.hang,
            live: self.live.clone(),
        }))
    }
}

struct ScriptedSubscription {
    lines: VecDeque<Vec<u8>>,
    exit_code: i32,
    hang: bool,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.lines.pop_front() {
            Some(line) => Some(line),
            None if self.hang => std::future::pending().await,
            None => None,
        }
    }

    async fn wait(&mut self) -> ExitReport {
        ExitReport {
            code: Some(self.exit_code),
            description: format!("exit status: {}", self.exit_code),
        }
    }
}

impl Drop for ScriptedSubscription {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// CBOR map with fields in the given order
pub fn cbor_map(fields: Vec<(&str, Value)>) -> Vec<u8> {
    let map: IndexMap<String, Value> = fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    serde_cbor::to_vec(&map).unwrap()
}

/// Subscription output line as the transport prints it
pub fn envelope_line(payload: &[u8]) -> Vec<u8> {
    serde_json::json!({
        "from": "12D3KooWSender",
        "data": format!("u{}", URL_SAFE_NO_PAD.encode(payload)),
        "seqno": "uAAAAAAAAAAE",
        "topicIDs": ["u12D3KooWTopic"],
    })
    .to_string()
    .into_bytes()
}

/// Every shard file under one channel directory, sorted by name
pub fn shard_files(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}
