//! Periodic heartbeat: every interval, read the workspace `HEARTBEAT.md`
//! and, when it has substantive content, run an agent turn with a fixed
//! prompt.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const HEARTBEAT_PROMPT: &str = "Read HEARTBEAT.md in your workspace (if it exists).\n\
     Follow any instructions or tasks listed there.\n\
     If nothing needs attention, reply with just: HEARTBEAT_OK";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Runs the heartbeat prompt through the agent; returns the reply text.
pub type HeartbeatCallback = Arc<dyn Fn(String) -> BoxFuture<'static, String> + Send + Sync>;

pub struct HeartbeatService {
    inner: Arc<HeartbeatInner>,
}

struct HeartbeatInner {
    workspace: PathBuf,
    callback: Option<HeartbeatCallback>,
    interval: Duration,
    enabled: bool,
    running: AtomicBool,
    notify: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatService {
    pub fn new(
        workspace: impl Into<PathBuf>,
        callback: Option<HeartbeatCallback>,
        interval: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(HeartbeatInner {
                workspace: workspace.into(),
                callback,
                interval,
                enabled,
                running: AtomicBool::new(false),
                notify: Notify::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn start(&self) {
        if !self.inner.enabled
            || self.inner.callback.is_none()
            || self.inner.running.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            info!(interval_secs = inner.interval.as_secs(), "heartbeat started");
            Self::run_loop(inner).await;
        });
        *self.inner.worker.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.notify.notify_waiters();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Fire the heartbeat prompt immediately, bypassing the file check.
    pub async fn trigger_now(&self) -> String {
        match &self.inner.callback {
            Some(cb) => cb(HEARTBEAT_PROMPT.to_string()).await,
            None => String::new(),
        }
    }

    async fn run_loop(inner: Arc<HeartbeatInner>) {
        while inner.running.load(Ordering::SeqCst) {
            let woken =
                tokio::time::timeout(inner.interval, inner.notify.notified()).await;
            if woken.is_ok() || !inner.running.load(Ordering::SeqCst) {
                break;
            }

            let path = inner.workspace.join("HEARTBEAT.md");
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            if heartbeat_empty(&content) {
                debug!("heartbeat file empty, skipping");
                continue;
            }

            if let Some(cb) = &inner.callback {
                let response = cb(HEARTBEAT_PROMPT.to_string()).await;
                if response.is_empty() {
                    error!("heartbeat callback returned no content");
                }
            }
        }
    }
}

/// A heartbeat file counts as empty when, after trimming, it holds only
/// headings, markdown comments, and unchecked/checked empty checkboxes.
pub fn heartbeat_empty(content: &str) -> bool {
    if content.trim().is_empty() {
        return true;
    }
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with("<!--")
            || line == "- [ ]"
            || line == "* [ ]"
            || line == "- [x]"
            || line == "* [x]"
        {
            continue;
        }
        return false;
    }
    true
}
