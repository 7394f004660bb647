use crate::core::types::ChannelMessage;
use crate::resilience::analytics::{CriticalPattern, ErrorRecord};

/// Observer registered under a channel key
///
/// Handlers run on the connection's dispatch task in registration order. A returned
/// error or a panic is reported to error analytics and never reaches other handlers.
pub trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, message: &ChannelMessage) -> anyhow::Result<()>;
}

impl<F> FrameHandler for F
where
    F: Fn(&ChannelMessage) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_frame(&self, message: &ChannelMessage) -> anyhow::Result<()> {
        self(message)
    }
}

/// Observer for recorded errors and critical repeat patterns
pub trait ErrorListener: Send + Sync + 'static {
    fn on_error(&self, record: &ErrorRecord);

    fn on_critical_pattern(&self, _pattern: &CriticalPattern) {}
}
