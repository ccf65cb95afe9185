use xroad_core::AttachmentLimit;

/// Dispatcher-level configuration.
///
/// Controls how many inbound attachments are kept and which middleware
/// chain wraps the handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How many non-root parts of a multipart request are decoded into
    /// attachments; the rest are drained and discarded.
    pub attachment_limit: AttachmentLimit,
    /// Replaces header logging with response dumping at `debug` level.
    pub verbose: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            attachment_limit: AttachmentLimit::First,
            verbose: false,
        }
    }
}
