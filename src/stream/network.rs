use tokio::sync::watch;
use tracing::info;

/// Process-wide network environment signals.
///
/// One monitor is shared by every connection manager. The embedding application
/// reports reachability changes and foreground transitions; managers observe them
/// through `watch` receivers.
#[derive(Debug)]
pub struct NetworkMonitor {
    online: watch::Sender<bool>,
    foreground: watch::Sender<u64>,
}

/// A manager's view of the [`NetworkMonitor`]
#[derive(Debug, Clone)]
pub struct NetworkWatch {
    pub(crate) online: watch::Receiver<bool>,
    pub(crate) foreground: watch::Receiver<u64>,
}

impl NetworkWatch {
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    /// Starts online
    pub fn new() -> Self {
        let (online, _) = watch::channel(true);
        let (foreground, _) = watch::channel(0);
        Self { online, foreground }
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "network availability changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// The application became active again after being backgrounded
    pub fn notify_foreground(&self) {
        self.foreground.send_modify(|n| *n = n.wrapping_add(1));
    }

    pub fn watch(&self) -> NetworkWatch {
        NetworkWatch {
            online: self.online.subscribe(),
            foreground: self.foreground.subscribe(),
        }
    }
}
