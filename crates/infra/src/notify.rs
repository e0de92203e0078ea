use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use feedpost_core::RunKey;
use feedpost_reconcile::PostingKey;

/// Something operators need to look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// No formula configured for the run's (line, version, product).
    ConfigurationMissing { run: RunKey, detail: String },
    /// Ledger answered with a non-success token.
    PostingRejected {
        key: PostingKey,
        token: String,
        cumulative_after: f64,
    },
}

/// Operator notification collaborator (mail, chat, ...).
///
/// Fire-and-forget: delivery failures are the sink's problem.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notice: Notice);
}

/// Logs notices at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::ConfigurationMissing { run, detail } => {
                warn!(run = %run, detail = %detail, "operator notice: configuration missing");
            }
            Notice::PostingRejected {
                key,
                token,
                cumulative_after,
            } => {
                warn!(key = %key, token = %token, cumulative_after, "operator notice: posting rejected");
            }
        }
    }
}

/// In-memory notifier for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    inner: Mutex<Vec<Notice>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notice> {
        self.inner.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notice: Notice) {
        if let Ok(mut n) = self.inner.lock() {
            n.push(notice);
        }
    }
}
