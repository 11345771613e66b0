mod config;
mod control;
mod remote;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mcbot_core::agent::prompt::PromptConfig;
use mcbot_core::agent::skills::{SkillRegistry, StaticSkillRegistry};
use mcbot_core::agent::{Engine, EngineConfig, Gateway};
use mcbot_core::llm::{ChatApiClient, ChatApiConfig};

use config::Config;
use remote::RemoteGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Config::load("config.toml")?;

    let api_key = std::env::var(&cfg.llm.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        warn!("{} is not set; model calls will fail", cfg.llm.api_key_env);
    }
    let llm = Arc::new(ChatApiClient::new(ChatApiConfig {
        endpoint: cfg.llm.endpoint.clone(),
        api_key,
        model: cfg.llm.model.clone(),
        temperature: cfg.llm.temperature,
        max_tokens: cfg.llm.max_tokens,
    }));

    let gateway: Arc<dyn Gateway> = Arc::new(
        RemoteGateway::connect(&cfg.gateway.addr)
            .await
            .context("gateway unavailable")?,
    );

    let tick_interval = cfg.tick_interval();
    let skills = Arc::new(StaticSkillRegistry::new(
        cfg.skills
            .into_iter()
            .map(config::SkillEntry::into_skill)
            .collect(),
    ));
    info!("loaded {} skills", skills.list().len());

    let mut prompt = PromptConfig::default();
    if let Some(persona) = cfg.agent.persona.clone() {
        prompt.persona = persona;
    }

    let engine = Engine::new(
        gateway.clone(),
        llm,
        skills,
        EngineConfig {
            tick_interval,
            prompt,
        },
    );
    let dispatcher = Arc::new(engine.command_dispatcher());

    // Event pump: gateway events -> dispatcher.
    let (tx, mut rx) = mpsc::channel(64);
    tokio::spawn(remote::pump_events(cfg.gateway.event_addr.clone(), tx));
    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatcher.handle_event(event).await;
            }
        });
    }

    // Control surface for operators.
    {
        let engine = engine.clone();
        let gateway = gateway.clone();
        let listen = cfg.control.listen.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(listen, engine, gateway).await {
                warn!("control listener failed: {e:#}");
            }
        });
    }

    engine.start().await;
    info!("mcbot up; ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");
    dispatcher.shutdown().await;
    engine.stop().await;
    Ok(())
}
