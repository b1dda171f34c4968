//! The outbound seam. Network plumbing lives outside the core.

use serde_json::Value;

/// Sink for outbound JSON messages.
///
/// Implementations must not block indefinitely; backpressure toward a
/// slow renderer is handled above this seam (frame throttle + ACK
/// window), not inside it.
pub trait Transport {
    fn send(&mut self, message: Value);
}

impl<F: FnMut(Value)> Transport for F {
    fn send(&mut self, message: Value) {
        self(message);
    }
}
