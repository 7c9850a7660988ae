//! Bounded mutation watch over the document.
//!
//! Catches gateway targets in inserted subtrees no matter which code path
//! inserted them, for widget behaviour the explicit overrides miss.

use super::interception::NavigationInterceptionPort;
use crate::browser::{Document, MutationObserver};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct MutationWatcher {
    observer: MutationObserver,
    task: JoinHandle<()>,
}

impl MutationWatcher {
    /// Observes `document` for `window`, then disconnects itself. Returns
    /// `None` outside a tokio runtime, where nothing can drive the watch.
    pub fn spawn(document: &Arc<Document>, port: Arc<dyn NavigationInterceptionPort>, window: Duration) -> Option<Self> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("no async runtime; mutation watch not started");
                return None;
            }
        };
        let (observer, mut inserted) = document.observe();
        let expiry = observer.clone();
        let task = runtime.spawn(async move {
            let deadline = sleep(window);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        debug!("mutation watch window elapsed");
                        break;
                    }
                    node = inserted.recv() => match node {
                        Some(node) => {
                            if let Some(target) = node.sources().into_iter().find(|src| port.try_redirect(src)) {
                                debug!(%target, "gateway target found in inserted subtree");
                            }
                        }
                        None => break,
                    },
                }
            }
            expiry.disconnect();
        });
        Some(Self { observer, task })
    }

    pub fn is_active(&self) -> bool { self.observer.is_connected() }

    pub fn stop(self) {
        self.observer.disconnect();
        self.task.abort();
    }
}
