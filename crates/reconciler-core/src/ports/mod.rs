//! Ports - traits at the kernel's seams.
//!
//! Each trait hides something the kernel must not own: time, id entropy,
//! log output, the wire, and whoever acts on proposals.

pub mod clock;
pub mod effector;
pub mod id_generator;
pub mod telemetry;
pub mod transport;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::effector::{Delivery, Effector, EffectorError, NoopEffector};
pub use self::id_generator::{IdGenerator, SequenceIdGenerator, UuidGenerator};
pub use self::telemetry::{NoopTelemetry, TelemetrySeverity, TelemetrySink};
pub use self::transport::{InboundHandler, Subscription, Transport, TransportError};
