use crate::core::traits::FrameHandler;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identifies one registered handler so it can be removed on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

pub(crate) type HandlerEntry = (HandlerId, Arc<dyn FrameHandler>);

/// Channel key -> handlers, in registration order
#[derive(Default)]
pub struct SubscriptionTable {
    channels: BTreeMap<String, Vec<HandlerEntry>>,
}

impl fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.channels.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns `true` when it is the channel's first handler.
    pub fn add(&mut self, channel: &str, id: HandlerId, handler: Arc<dyn FrameHandler>) -> bool {
        let handlers = self.channels.entry(channel.to_string()).or_default();
        handlers.push((id, handler));
        handlers.len() == 1
    }

    /// Remove one handler, or every handler when `id` is `None`.
    ///
    /// Returns `true` when the channel went from live to empty, i.e. an unsubscribe
    /// request is due.
    pub fn remove(&mut self, channel: &str, id: Option<HandlerId>) -> bool {
        let Some(handlers) = self.channels.get_mut(channel) else {
            return false;
        };

        let before = handlers.len();
        match id {
            Some(id) => handlers.retain(|(h, _)| *h != id),
            None => handlers.clear(),
        }

        if handlers.is_empty() {
            self.channels.remove(channel);
            return before > 0;
        }
        false
    }

    pub fn handlers(&self, channel: &str) -> Option<&[HandlerEntry]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Channels with at least one live handler
    pub fn channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ChannelMessage;

    fn noop() -> Arc<dyn FrameHandler> {
        Arc::new(|_: &ChannelMessage| -> anyhow::Result<()> { Ok(()) })
    }

    #[test]
    fn test_first_handler_is_reported() {
        let mut table = SubscriptionTable::new();
        assert!(table.add("btcusdt@trade", HandlerId(1), noop()));
        assert!(!table.add("btcusdt@trade", HandlerId(2), noop()));
        assert_eq!(table.handler_count("btcusdt@trade"), 2);
    }

    #[test]
    fn test_removing_last_handler_empties_channel() {
        let mut table = SubscriptionTable::new();
        table.add("trades:BTC", HandlerId(1), noop());
        table.add("trades:BTC", HandlerId(2), noop());

        assert!(!table.remove("trades:BTC", Some(HandlerId(1))));
        assert_eq!(table.handlers("trades:BTC").unwrap()[0].0, HandlerId(2));
        assert!(table.remove("trades:BTC", Some(HandlerId(2))));
        assert!(table.channels().is_empty());
    }

    #[test]
    fn test_remove_all_and_unknown() {
        let mut table = SubscriptionTable::new();
        table.add("a", HandlerId(1), noop());
        table.add("a", HandlerId(2), noop());
        assert!(!table.remove("missing", None));
        assert!(!table.remove("a", Some(HandlerId(9))));
        assert!(table.remove("a", None));
        assert!(table.is_empty());
    }
}
