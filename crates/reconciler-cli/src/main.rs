use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant, sleep};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use reconciler_core::KernelBuilder;
use reconciler_core::config::KernelConfig;
use reconciler_core::domain::task::META_CORRELATION_ID;
use reconciler_core::domain::{
    ActionCode, ActorRole, CorrelationId, Envelope, Metadata, MsgId, Payload, TaskId, TaskState,
};
use reconciler_core::impls::InMemoryTransport;
use reconciler_core::ports::{IdGenerator, NoopTelemetry, SystemClock, UuidGenerator};
use reconciler_core::protocol::{EnvelopeCodec, EnvelopeDraft};

#[derive(Parser, Debug)]
#[command(name = "reconciler")]
#[command(version, about = "Sovereign decision kernel", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the kernel loop against a simulated driver
    Run {
        /// Tasks to create
        #[arg(long, default_value_t = 3)]
        tasks: usize,

        /// Give up after this long
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,

        /// Evaluate and deliver, but leave the lifecycle to the driver side
        #[arg(long)]
        observe_only: bool,
    },

    /// Validate an envelope stored as JSON
    Validate { file: PathBuf },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = match &cli.config {
        Some(path) => KernelConfig::load(path)?,
        None => KernelConfig::default(),
    };

    match cli.command {
        Commands::Run {
            tasks,
            timeout_ms,
            observe_only,
        } => run(config, tasks, Duration::from_millis(timeout_ms), observe_only).await,
        Commands::Validate { file } => validate(&file),
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn validate(file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let codec = EnvelopeCodec::new(
        Arc::new(NoopTelemetry),
        Arc::new(SystemClock),
        Arc::new(UuidGenerator),
    );
    match codec.decode_str(&raw) {
        Ok(envelope) => {
            println!(
                "valid {} {} from {} (msg_id={}, correlation_id={})",
                envelope.message_type(),
                envelope.action_code(),
                envelope.identity.actor,
                envelope.msg_id(),
                envelope.correlation_id(),
            );
            Ok(())
        }
        Err(rejected) => bail!("{rejected}"),
    }
}

async fn run(
    mut config: KernelConfig,
    tasks: usize,
    timeout: Duration,
    observe_only: bool,
) -> Result<()> {
    config.apply_proposals = !observe_only;
    let tick_interval_ms = config.tick_interval_ms;

    let transport = InMemoryTransport::new();
    let running = KernelBuilder::new()
        .config(config)
        .transport(Arc::new(transport.clone()))
        .build()?
        .spawn();
    let handle = running.handle();

    let (stop_tx, stop_rx) = watch::channel(false);
    let driver = tokio::spawn(simulated_driver(transport.clone(), stop_rx));

    for i in 0..tasks {
        let correlation_id = CorrelationId::from_uuid(UuidGenerator.next_uuid());
        let mut metadata = Metadata::new();
        metadata.insert(META_CORRELATION_ID.into(), json!(correlation_id.to_string()));
        handle
            .create_task(TaskId::new(format!("demo-{i}")), metadata)
            .await?;
    }

    let deadline = Instant::now() + timeout;
    loop {
        let listed = handle.list_tasks().await?;
        if listed.iter().all(|t| t.state == TaskState::Terminated) {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!("timed out with {} task(s) still open", listed.len());
            break;
        }
        sleep(Duration::from_millis(tick_interval_ms)).await;
    }

    let _ = stop_tx.send(true);
    driver.await?;
    let kernel = running.shutdown_and_join().await?;

    for task in kernel.list_tasks() {
        println!(
            "{}: {} ({} history entries)",
            task.task_id,
            task.state,
            task.history.len()
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&kernel.status(tick_interval_ms))?
    );
    Ok(())
}

/// Plays the DRIVER: acknowledges every command, then reports progress and
/// completion for each started task on a later poll.
async fn simulated_driver(transport: InMemoryTransport, mut stop: watch::Receiver<bool>) {
    let codec = EnvelopeCodec::new(
        Arc::new(NoopTelemetry),
        Arc::new(SystemClock),
        Arc::new(UuidGenerator),
    );
    let mut answered = 0;
    let mut running: HashMap<MsgId, Envelope> = HashMap::new();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = sleep(Duration::from_millis(20)) => {}
        }

        for (_, start) in running.drain() {
            let done = json!({ "done": true });
            if let Err(e) =
                report(&transport, &codec, &start, ActionCode::DriverTaskCompleted, done)
            {
                tracing::warn!("driver could not report completion: {e}");
            }
        }

        let commands = transport.sent_commands();
        for command in commands.iter().skip(answered) {
            match codec.ack_for(command, ActorRole::Driver) {
                Ok(ack) => {
                    transport.inject(ack.to_value());
                }
                Err(e) => tracing::warn!("driver could not acknowledge: {e}"),
            }
            if command.action_code() == ActionCode::TaskStart {
                let progress = json!({ "progress": 0.0 });
                if let Err(e) =
                    report(&transport, &codec, command, ActionCode::DriverTaskStarted, progress)
                {
                    tracing::warn!("driver could not report start: {e}");
                }
                running.insert(command.msg_id(), command.clone());
            }
        }
        answered = commands.len();
    }
}

fn report(
    transport: &InMemoryTransport,
    codec: &EnvelopeCodec,
    command: &Envelope,
    action_code: ActionCode,
    detail: serde_json::Value,
) -> Result<()> {
    let mut payload = Payload::new();
    if let Some(task_id) = command.payload.get("taskId") {
        payload.insert("taskId".into(), task_id.clone());
    }
    if let Some(fields) = detail.as_object() {
        payload.extend(fields.clone());
    }
    let event = codec.build(
        EnvelopeDraft::event(ActorRole::Driver, action_code)
            .with_correlation(command.correlation_id())
            .with_payload(payload),
    )?;
    transport.inject(event.to_value());
    Ok(())
}
