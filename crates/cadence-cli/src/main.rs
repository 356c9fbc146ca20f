use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_core::app::AppBuilder;
use cadence_core::config::Settings;
use cadence_core::domain::{RecurrenceRule, TaskDefinition};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(version)]
#[command(about = "Schedule one-time and recurring tasks and track their execution status")]
struct Cli {
    /// Configuration file path (defaults are used when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schedule sample tasks, stream their updates, then print execution counts
    Demo {
        /// How long to run before shutting down
        #[arg(long, default_value_t = 10)]
        run_for_secs: u64,

        /// Override `scheduling.min_lead_time_secs`
        #[arg(long)]
        min_lead_secs: Option<u64>,

        /// Override `simulation.duration_ms`
        #[arg(long)]
        work_ms: Option<u64>,

        /// Override `simulation.failure_rate`
        #[arg(long)]
        failure_rate: Option<f64>,
    },

    /// Print the next fire times of a recurrence expression
    Next {
        /// 5-field (`*/5 * * * *`) or seconds-first 6/7-field expression
        expression: String,

        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("cadence_core={level},cadence={level}", level = cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };

    match cli.command {
        Command::Demo {
            run_for_secs,
            min_lead_secs,
            work_ms,
            failure_rate,
        } => {
            let mut settings = settings;
            if let Some(secs) = min_lead_secs {
                settings.scheduling.min_lead_time_secs = secs;
            }
            if let Some(ms) = work_ms {
                settings.simulation.duration_ms = ms;
            }
            if let Some(rate) = failure_rate {
                settings.simulation.failure_rate = rate;
            }
            demo(settings, Duration::from_secs(run_for_secs)).await
        }
        Command::Next { expression, count } => next(&expression, count),
    }
}

async fn demo(settings: Settings, run_for: Duration) -> Result<()> {
    let app = AppBuilder::new(settings).build()?;
    let mut updates = app.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => println!("update: {json}"),
                    Err(e) => tracing::warn!(error = %e, "snapshot not serializable"),
                },
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "update stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let workers = app.start_workers();
    info!(workers = workers.len(), "Starting cadence demo v{}", env!("CARGO_PKG_VERSION"));

    let coordinator = app.coordinator();
    let lead = app.settings().scheduling.min_lead_time();
    let recurring = coordinator
        .create(TaskDefinition::recurring("heartbeat", "*/2 * * * * *"))
        .await?;
    let one_time = coordinator
        .create(TaskDefinition::one_time(
            "report",
            Utc::now() + lead + chrono::Duration::seconds(2),
        ))
        .await?;
    info!(recurring = %recurring.id, one_time = %one_time.id, "sample tasks scheduled");

    tokio::select! {
        _ = tokio::time::sleep(run_for) => {},
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    for task in coordinator.find_all().await? {
        println!("task: {}", serde_json::to_string(&task)?);
    }
    println!("status: {}", serde_json::to_string(&app.status().await?)?);

    coordinator.delete_all().await?;
    app.shutdown(workers).await;
    printer.abort();
    Ok(())
}

fn next(expression: &str, count: usize) -> Result<()> {
    let rule = RecurrenceRule::parse(expression)?;
    let upcoming = rule.upcoming(Utc::now(), count);
    if upcoming.is_empty() {
        println!("'{}' has no upcoming occurrence", rule.expression());
    }
    for at in upcoming {
        println!("{}", at.to_rfc3339());
    }
    Ok(())
}
