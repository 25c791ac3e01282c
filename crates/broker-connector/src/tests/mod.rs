//! Integration tests for the broker connector.
//!
//! - `harness.rs`   - Mock broker, recording stage handler, runtime helpers
//! - `connector.rs` - Connection setup, session fan-out, failure reporting
//! - `session.rs`   - Producer/consumer creation paths, close and abort
//! - `ack.rs`       - Ordered acknowledgment queue and its backpressure
//! - `tx.rs`        - Single in-flight commit queue and envelope matching
//! - `stage.rs`     - Stage event loop and teardown

mod connector;

#[allow(unused_imports)]
pub use harness::{BlockingHarness, MockBroker, RecordingHandler};
