//! Gateway assembly: build the bus, provider, agent, cron, heartbeat, and
//! channel manager from configuration, and run them until shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use porter_channels::ChannelManager;
use porter_config::{data_dir, loader::expand_user_path, PorterConfig};
use porter_core::{MessageBus, Metrics, OutboundEnvelope, Result};
use porter_llm::{LlmProvider, OpenAiCompatProvider};
use porter_runtime::{
    Agent, AgentSettings, CommandExternalCli, CronService, HeartbeatService,
};
use tracing::info;

/// Everything a running gateway owns. Shutdown order is fixed: agent,
/// heartbeat, cron, channel manager, dispatcher.
pub struct Gateway {
    pub bus: Arc<MessageBus>,
    pub agent: Agent,
    pub cron: Arc<CronService>,
    pub heartbeat: HeartbeatService,
    pub channels: ChannelManager,
    pub metrics: Arc<Metrics>,
}

pub fn agent_settings(config: &PorterConfig) -> AgentSettings {
    let workspace = expand_user_path(&config.agent.workspace);

    // Transcription falls back to the main provider's credentials.
    let transcribe_api_key = if config.tools.transcribe.api_key.trim().is_empty() {
        config.provider.api_key.clone()
    } else {
        config.tools.transcribe.api_key.clone()
    };
    let transcribe_api_base = config.tools.transcribe.api_base.clone();

    AgentSettings {
        sessions_dir: data_dir().join("sessions"),
        workspace,
        model: config.agent.model.clone(),
        max_iterations: config.agent.max_iterations,
        temperature: config.agent.temperature,
        top_p: config.agent.top_p,
        max_tokens: config.agent.max_tokens,
        memory_window: config.agent.memory_window,
        web_search_api_key: config.tools.web_search.api_key.clone(),
        transcribe_api_key,
        transcribe_api_base,
        transcribe_model: config.tools.transcribe.model.clone(),
        transcribe_timeout_secs: config.tools.transcribe.timeout_secs,
        exec_timeout_secs: config.tools.exec.timeout_secs,
        restrict_to_workspace: config.tools.restrict_to_workspace,
    }
}

pub fn build_provider(config: &PorterConfig) -> Arc<dyn LlmProvider> {
    Arc::new(OpenAiCompatProvider::new(
        config.provider.api_key.clone(),
        config.provider.api_base.clone(),
        config.agent.model.clone(),
    ))
}

pub fn cron_store_path() -> std::path::PathBuf {
    data_dir().join("cron").join("jobs.json")
}

pub fn metrics_snapshot_path() -> std::path::PathBuf {
    data_dir().join("state").join("metrics.json")
}

/// Wire the whole gateway together. Channel adapters are registered by the
/// caller before `start`.
pub fn build(config: &PorterConfig) -> Result<Gateway> {
    let settings = agent_settings(config);
    std::fs::create_dir_all(&settings.workspace)?;

    let bus = Arc::new(MessageBus::new());
    let metrics = Arc::new(Metrics::new());
    let provider = build_provider(config);
    let cron = Arc::new(CronService::new(cron_store_path()));
    let external = Arc::new(CommandExternalCli::new(settings.workspace.clone()));

    let agent = Agent::new(
        Arc::clone(&bus),
        provider,
        settings.clone(),
        Some(Arc::clone(&cron)),
        Some(external),
        Arc::clone(&metrics),
    );

    // Cron jobs run an agent turn; deliverable results go out on the bus.
    {
        let agent = agent.clone();
        let bus = Arc::clone(&bus);
        cron.set_on_job(Arc::new(move |job: porter_runtime::CronJob| {
            let agent = agent.clone();
            let bus = Arc::clone(&bus);
            async move {
                let channel = if job.payload.channel.is_empty() {
                    "cli"
                } else {
                    job.payload.channel.as_str()
                };
                let to = if job.payload.to.is_empty() {
                    "direct"
                } else {
                    job.payload.to.as_str()
                };
                let response = agent
                    .process_direct(
                        &job.payload.message,
                        &format!("cron:{}", job.id),
                        channel,
                        to,
                    )
                    .await;

                if job.payload.deliver
                    && !job.payload.channel.is_empty()
                    && !job.payload.to.is_empty()
                {
                    bus.publish_outbound(OutboundEnvelope::new(
                        job.payload.channel.clone(),
                        job.payload.to.clone(),
                        response.clone(),
                    ))
                    .await;
                }
                Ok(Some(response))
            }
            .boxed()
        }));
    }

    let heartbeat = {
        let agent = agent.clone();
        HeartbeatService::new(
            settings.workspace.clone(),
            Some(Arc::new(move |prompt: String| {
                let agent = agent.clone();
                async move {
                    agent
                        .process_direct(&prompt, "heartbeat", "cli", "heartbeat")
                        .await
                }
                .boxed()
            })),
            Duration::from_secs(config.heartbeat.interval_secs),
            config.heartbeat.enabled,
        )
    };

    let channels = ChannelManager::new(Arc::clone(&bus));

    Ok(Gateway {
        bus,
        agent,
        cron,
        heartbeat,
        channels,
        metrics,
    })
}

impl Gateway {
    pub async fn start(&self) -> Result<()> {
        self.bus.start_dispatcher();
        self.channels.start_all().await?;
        self.cron.start();
        self.heartbeat.start();
        self.agent.run();
        info!("gateway started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("gateway shutting down");
        self.agent.stop().await;
        self.heartbeat.stop().await;
        self.cron.stop().await;
        self.channels.stop_all().await;
        self.bus.stop_dispatcher().await;
        self.metrics.write_snapshot(&metrics_snapshot_path());
    }
}
