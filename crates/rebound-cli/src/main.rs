use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use rebound_core::ReboundConfig;
use rebound_core::app::{DeadLetterMonitor, StatusCounts, TaskProcessor, TaskService, WorkerGroup};
use rebound_core::domain::TaskRecord;
use rebound_core::impls::{InMemoryTaskQueue, InMemoryTaskStore, QueueDepths, SimulatedWork};
use rebound_core::ports::{Clock, SystemClock, UlidGenerator};

/// Submit a batch of tasks to an in-memory pipeline with randomly failing work,
/// run the workers until every task is terminal, then print the final records.
///
/// Defaults come from the environment (BASE_DELAY_SECONDS, MAX_DELAY_SECONDS,
/// MAX_RETRIES, FAILURE_RATE, WORKER_CONCURRENCY, ...); flags override them.
#[derive(Parser, Debug)]
#[command(name = "rebound")]
#[command(about = "Retry / dead-letter demo for asynchronously processed tasks", long_about = None)]
struct Args {
    /// Number of tasks to submit
    #[arg(short = 'n', long, default_value_t = 10)]
    tasks: usize,

    /// Payload prefix; task i gets "<prefix>-<i>"
    #[arg(long, default_value = "answer")]
    payload_prefix: String,

    /// Processor workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Probability that an attempt fails, in [0, 1]
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Retries beyond the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Delay before the first retry, in seconds
    #[arg(long)]
    base_delay_secs: Option<u64>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    counts: StatusCounts,
    queue: QueueDepths,
    timed_out: bool,
    tasks: Vec<TaskRecord>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let mut config = ReboundConfig::from_env().context("loading configuration")?;
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if let Some(rate) = args.failure_rate {
        anyhow::ensure!((0.0..=1.0).contains(&rate), "--failure-rate must be in [0, 1]");
        config.failure_rate = rate;
    }
    if let Some(max_retries) = args.max_retries {
        config.backoff.max_retries = max_retries;
    }
    if let Some(secs) = args.base_delay_secs {
        config.backoff.base_delay = Duration::from_secs(secs);
    }
    info!(?config, "starting");

    // (A) store / queue / work を用意
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryTaskStore::new(clock.clone()));
    let queue = Arc::new(InMemoryTaskQueue::new());
    let work = Arc::new(SimulatedWork::new(config.failure_rate));

    let service = TaskService::new(
        store.clone(),
        queue.clone(),
        Arc::new(UlidGenerator::new(SystemClock)),
    );
    let processor = Arc::new(
        TaskProcessor::new(store.clone(), queue.clone(), work, config.backoff.clone())
            .with_clock(clock),
    );
    let monitor = Arc::new(DeadLetterMonitor::new(store.clone()));

    // (B) worker を起動
    let group = WorkerGroup::spawn(
        config.workers,
        queue.clone(),
        processor,
        monitor,
        config.redelivery,
    );

    // (C) タスク投入
    for i in 0..args.tasks {
        let payload = format!("{}-{i}", args.payload_prefix);
        match service.submit(payload).await {
            Ok(resp) => info!(task_id = %resp.task_id, "submitted"),
            Err(err) => warn!(error = %err, "submission failed"),
        }
    }

    // (D) 全タスクが terminal になるまで待つ
    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let timed_out = tokio::select! {
        timed_out = wait_until_terminal(&service, deadline) => timed_out?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            true
        }
    };
    if timed_out {
        warn!("stopped before every task reached a terminal status");
    }

    group.shutdown_and_join().await;

    let tasks = service.list().await?;
    let report = Report {
        counts: StatusCounts::from_records(&tasks),
        queue: queue.depths().await,
        timed_out,
        tasks,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Poll the status query. Returns `true` if the deadline passed first.
async fn wait_until_terminal(service: &TaskService, deadline: Instant) -> anyhow::Result<bool> {
    loop {
        let counts = StatusCounts::from_records(&service.list().await?);
        if counts.all_terminal() {
            info!(processed = counts.processed, failed = counts.failed, "all tasks terminal");
            return Ok(false);
        }
        if Instant::now() >= deadline {
            return Ok(true);
        }
        sleep(Duration::from_millis(200)).await;
    }
}
