//! KernelBuilder - wiring and start-up validation.
//!
//! Every seam has a default, so `KernelBuilder::new().build()` gives a
//! working kernel: system clock, random v4 ids, `tracing` telemetry and an
//! effector that does nothing. With a transport, commands and (unless
//! `telemetry.publish = false`) telemetry go out over it. The config is
//! validated before anything is constructed.

use std::sync::Arc;

use super::kernel::{Kernel, KernelParts};
use super::kernel_loop::KernelLoop;
use crate::config::{ConfigError, KernelConfig};
use crate::execution::ExecutionEngine;
use crate::impls::{
    FanoutTelemetry, RecordingTelemetry, TelemetryPump, TracingTelemetry, TransportEffector,
    TransportTelemetry,
};
use crate::policy::PolicyEngine;
use crate::ports::{
    Clock, Effector, IdGenerator, NoopEffector, SystemClock, TelemetrySink, Transport,
    UuidGenerator,
};
use crate::protocol::EnvelopeCodec;
use crate::runtime::TaskRuntime;
use crate::store::ObservationStore;

/// Fail-fast builder for a `Kernel` or a `KernelLoop`.
///
/// ```ignore
/// let running = KernelBuilder::new()
///     .config(KernelConfig::load("reconciler.toml")?)
///     .transport(Arc::new(transport))
///     .build()?
///     .spawn();
/// ```
#[derive(Default)]
pub struct KernelBuilder {
    config: KernelConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    transport: Option<Arc<dyn Transport>>,
    effector: Option<Arc<dyn Effector>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// External sink. The in-memory recorder is always added next to it.
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Inbound source for the loop; also the default effector's outlet.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn effector(mut self, effector: Arc<dyn Effector>) -> Self {
        self.effector = Some(effector);
        self
    }

    /// Build the synchronous aggregate only. Telemetry is not published.
    pub fn build_kernel(self) -> Result<Kernel, BuildError> {
        Ok(self.assemble(false)?.kernel)
    }

    /// Build the kernel plus everything its loop needs.
    pub fn build(self) -> Result<KernelLoop, BuildError> {
        let parts = self.assemble(true)?;
        Ok(KernelLoop::new(
            parts.kernel,
            parts.config,
            parts.transport,
            parts.effector,
            parts.pump,
        ))
    }

    fn assemble(self, publish: bool) -> Result<Assembled, BuildError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self.ids.unwrap_or_else(|| Arc::new(UuidGenerator));

        // publishing codec reports to `tracing` only, never back into the fan-out
        let (published, pump) = match &self.transport {
            Some(transport) if publish && self.config.telemetry.publish => {
                let codec =
                    EnvelopeCodec::new(Arc::new(TracingTelemetry), clock.clone(), ids.clone());
                let (sink, pump) =
                    TransportTelemetry::new(codec, clock.clone(), transport.clone());
                (Some(Arc::new(sink)), Some(pump))
            }
            _ => (None, None),
        };

        let mut recorder =
            RecordingTelemetry::new(self.config.telemetry.retention).with_clock(clock.clone());
        if let Some(published) = &published {
            recorder = recorder.with_overflow(published.clone());
        }
        let recorder = Arc::new(recorder);

        let mut fanout = FanoutTelemetry::default().with(recorder.clone());
        if let Some(published) = published {
            fanout = fanout.with(published);
        }
        let external = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TracingTelemetry));
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(fanout.with(external));

        let codec = EnvelopeCodec::new(telemetry.clone(), clock.clone(), ids);
        let effector: Arc<dyn Effector> = match (self.effector, &self.transport) {
            (Some(effector), _) => effector,
            (None, Some(transport)) => Arc::new(TransportEffector::new(
                codec.clone(),
                transport.clone(),
            )),
            (None, None) => Arc::new(NoopEffector),
        };

        let kernel = Kernel::from_parts(KernelParts {
            runtime: TaskRuntime::new(telemetry.clone(), clock.clone()),
            store: ObservationStore::new(telemetry.clone(), clock.clone())
                .with_max_per_correlation(self.config.observations.max_per_correlation),
            policy: PolicyEngine::new(telemetry.clone(), self.config.limits.clone()),
            engine: ExecutionEngine::new(telemetry.clone())
                .with_activation_delay(self.config.activation_delay_ms),
            codec,
            telemetry,
            recorder,
            clock,
            track_stalls: self.config.track_stalls,
        });
        Ok(Assembled {
            kernel,
            config: self.config,
            transport: self.transport,
            effector,
            pump,
        })
    }
}

struct Assembled {
    kernel: Kernel,
    config: KernelConfig,
    transport: Option<Arc<dyn Transport>>,
    effector: Arc<dyn Effector>,
    pump: Option<TelemetryPump>,
}
