//! Impls - in-process implementations of the ports.
//!
//! Real transports (WebSocket, HTTP) live outside this crate; everything here
//! runs in one process and is what the CLI and the tests wire together.

pub mod fanout_telemetry;
pub mod inmem_transport;
pub mod recording_telemetry;
pub mod tracing_telemetry;
pub mod transport_effector;
pub mod transport_telemetry;

pub use self::fanout_telemetry::FanoutTelemetry;
pub use self::inmem_transport::{InMemoryTransport, OutboundMessage};
pub use self::recording_telemetry::{RecordingTelemetry, TELEMETRY_DISCARDED, TelemetryEvent};
pub use self::tracing_telemetry::TracingTelemetry;
pub use self::transport_effector::TransportEffector;
pub use self::transport_telemetry::{TelemetryPump, TransportTelemetry};
