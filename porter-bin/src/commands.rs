use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::FutureExt;
use porter_config::data_dir;
use porter_core::{OutboundEnvelope, Result};
use porter_runtime::{CronSchedule, CronService};
use tracing_subscriber::EnvFilter;

use crate::gateway;

#[derive(Parser)]
#[command(name = "porter", version, about = "Porter - personal AI assistant gateway")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway until interrupted.
    Gateway,
    /// One-shot agent turn against the same core.
    Agent {
        /// Message to process.
        #[arg(short, long)]
        message: String,
        /// Session key (defaults to cli:direct).
        #[arg(short, long, default_value = "cli:direct")]
        session: String,
        /// Stream deltas to stdout as they arrive.
        #[arg(long)]
        stream: bool,
    },
    /// Manage scheduled jobs.
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
    /// Show configuration and scheduler state.
    Status,
}

#[derive(Subcommand)]
enum CronAction {
    /// List all jobs.
    List,
    /// Add a job.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        message: String,
        /// Fixed period in seconds.
        #[arg(long)]
        every: Option<i64>,
        /// 5-field cron expression.
        #[arg(long)]
        cron: Option<String>,
        /// Absolute time (YYYY-MM-DDTHH:MM:SS, local).
        #[arg(long)]
        at: Option<String>,
    },
    /// Remove a job by id.
    Remove { job_id: String },
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();

        match &self.command {
            Command::Gateway => run_gateway().await,
            Command::Agent {
                message,
                session,
                stream,
            } => run_agent_once(message, session, *stream).await,
            Command::Cron { action } => run_cron(action),
            Command::Status => run_status(),
        }
    }
}

async fn run_gateway() -> Result<()> {
    let config = porter_config::load(None)?;
    let gw = gateway::build(&config)?;

    // Deliveries addressed to the cli channel land on stdout.
    gw.bus.subscribe_outbound(
        "cli",
        Arc::new(|msg: OutboundEnvelope| {
            async move {
                if !msg.content.is_empty() {
                    println!("[{}] {}", msg.chat_id, msg.content);
                }
                Ok(())
            }
            .boxed()
        }),
    );

    gw.start().await?;
    let enabled = gw.channels.enabled_channels();
    if enabled.is_empty() {
        println!("No channels enabled.");
    } else {
        println!("Enabled channels: {}", enabled.join(", "));
    }
    println!("Porter gateway started. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    gw.shutdown().await;
    Ok(())
}

async fn run_agent_once(message: &str, session: &str, stream: bool) -> Result<()> {
    let config = porter_config::load(None)?;
    let settings = gateway::agent_settings(&config);
    std::fs::create_dir_all(&settings.workspace)?;

    let bus = Arc::new(porter_core::MessageBus::new());
    let metrics = Arc::new(porter_core::Metrics::new());
    let cron = Arc::new(CronService::new(gateway::cron_store_path()));
    let external = Arc::new(porter_runtime::CommandExternalCli::new(
        settings.workspace.clone(),
    ));
    let agent = porter_runtime::Agent::new(
        bus,
        gateway::build_provider(&config),
        settings,
        Some(cron),
        Some(external),
        metrics,
    );

    let (channel, chat_id) = session.split_once(':').unwrap_or(("cli", "direct"));
    let response = if stream {
        let out = agent
            .process_direct_stream(message, session, channel, chat_id, &|piece: &str| {
                print!("{piece}");
                use std::io::Write;
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();
        out
    } else {
        let out = agent.process_direct(message, session, channel, chat_id).await;
        println!("{out}");
        out
    };
    let _ = response;
    Ok(())
}

fn run_cron(action: &CronAction) -> Result<()> {
    let cron = CronService::new(gateway::cron_store_path());

    match action {
        CronAction::List => {
            let jobs = cron.list_jobs(true);
            if jobs.is_empty() {
                println!("No scheduled jobs.");
                return Ok(());
            }
            for job in jobs {
                let schedule = match job.schedule.kind.as_str() {
                    "every" => format!("every {}s", job.schedule.every_ms / 1000),
                    "cron" => format!("cron '{}'", job.schedule.expr),
                    _ => format!("at {}", job.schedule.at_ms),
                };
                println!(
                    "{}  {}  [{}]  {}  next={}  last={}",
                    job.id,
                    job.name,
                    if job.enabled { "enabled" } else { "disabled" },
                    schedule,
                    job.state.next_run_at_ms,
                    if job.state.last_status.is_empty() {
                        "-"
                    } else {
                        &job.state.last_status
                    },
                );
            }
        }
        CronAction::Add {
            name,
            message,
            every,
            cron: cron_expr,
            at,
        } => {
            // Source precedence: every first, then cron, then at.
            let (schedule, delete_after) = if let Some(every) = every {
                (CronSchedule::every(every * 1000), false)
            } else if let Some(expr) = cron_expr {
                (CronSchedule::cron(expr.clone()), false)
            } else if let Some(at) = at {
                let naive =
                    chrono::NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M:%S").map_err(
                        |_| {
                            porter_core::PorterError::Cron(
                                "invalid --at datetime (expected YYYY-MM-DDTHH:MM:SS)".into(),
                            )
                        },
                    )?;
                let at_ms = chrono::TimeZone::from_local_datetime(&chrono::Local, &naive)
                    .single()
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(0);
                if at_ms <= 0 {
                    return Err(porter_core::PorterError::Cron(
                        "invalid --at datetime".into(),
                    ));
                }
                (CronSchedule::at(at_ms), true)
            } else {
                return Err(porter_core::PorterError::Cron(
                    "one of --every, --cron, or --at is required".into(),
                ));
            };

            let job = cron.add_job(name, schedule, message, false, "", "", delete_after);
            println!("Created job '{}' (id: {})", job.name, job.id);
        }
        CronAction::Remove { job_id } => {
            if cron.remove_job(job_id) {
                println!("Removed job {job_id}");
            } else {
                println!("Job {job_id} not found");
            }
        }
    }
    Ok(())
}

fn run_status() -> Result<()> {
    let config = porter_config::load(None)?;
    println!("Porter status\n");
    println!("Model: {}", config.agent.model);
    println!("Workspace: {}", config.agent.workspace);
    println!(
        "Provider API key: {}",
        if config.provider.api_key.is_empty() {
            "not set"
        } else {
            "set"
        }
    );
    println!(
        "Telegram: {}",
        if config.channels.telegram.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "WhatsApp: {}",
        if config.channels.whatsapp.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "Heartbeat: {} ({}s)",
        if config.heartbeat.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.heartbeat.interval_secs,
    );

    let cron = CronService::new(gateway::cron_store_path());
    println!("\nCron: {}", cron.status());

    let metrics_path = gateway::metrics_snapshot_path();
    if let Ok(raw) = std::fs::read_to_string(&metrics_path) {
        println!("\nMetrics snapshot ({}):\n{raw}", metrics_path.display());
    }

    println!("\nData dir: {}", data_dir().display());
    Ok(())
}
