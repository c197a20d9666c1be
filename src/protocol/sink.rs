//! Feeding raw frames into a live subscription.

use super::decoder::SubscribeDecoder;
use crate::error::SubscribeError;
use crate::subscriptions::EventSink;
use tracing::debug;

/// Decodes text frames and delivers the resulting events to a sink.
///
/// Key violations are reported on the subscription and decoding continues;
/// any other decoding failure ends the run. `CommandComplete` ends it cleanly.
pub struct DecodingSink {
    decoder: SubscribeDecoder,
    sink: EventSink,
}

impl DecodingSink {
    pub fn new(sink: EventSink) -> Self {
        Self {
            decoder: SubscribeDecoder::new(),
            sink,
        }
    }

    /// Handle one text frame. Returns false once the transport should stop.
    pub fn on_text(&mut self, text: &str) -> bool {
        let active = match self.decoder.decode(text) {
            Ok(events) if events.is_empty() => self.sink.is_active(),
            Ok(events) => self.sink.send_batch(events),
            Err(e @ SubscribeError::KeyViolation(_)) => self.sink.report(e),
            Err(e) => {
                debug!(error = %e, "decoding failed, ending subscription");
                self.sink.fail(e);
                return false;
            }
        };

        if active && self.decoder.finished() {
            debug!("subscribe completed, ending run");
            self.sink.finish();
            return false;
        }
        active
    }

    /// The connection closed underneath the transport.
    pub fn on_close(&mut self, reason: impl Into<String>) {
        self.sink.fail(SubscribeError::Transport(reason.into()));
    }

    pub fn decoder(&self) -> &SubscribeDecoder {
        &self.decoder
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }
}
