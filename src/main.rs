use std::sync::Arc;

use anyhow::Context;

use ticket_dispatch::backend::create_backend;
use ticket_dispatch::channels::{Channel, CliChannel, SlackChannel};
use ticket_dispatch::config::{BackendConfig, DispatchConfig, SlackConfig};
use ticket_dispatch::onboarding::OnboardingManager;
use ticket_dispatch::pipeline::{self, Dispatcher};
use ticket_dispatch::workspace::WorkspaceLinkRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let backend_config = BackendConfig::from_env().context("loading backend configuration")?;
    let dispatch_config = DispatchConfig::from_env().context("loading dispatch configuration")?;

    eprintln!("🎫 Ticket Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", backend_config.api_url);
    eprintln!(
        "   Backend timeout: {}s",
        dispatch_config.backend_timeout.as_secs()
    );
    match dispatch_config.onboarding_ttl {
        Some(ttl) => eprintln!("   Onboarding prompt TTL: {}s", ttl.as_secs()),
        None => eprintln!("   Onboarding prompt TTL: never expires"),
    }

    // ── Dispatcher ───────────────────────────────────────────────────────
    // Link and onboarding state live for the process only.
    let backend = create_backend(&backend_config);
    let dispatcher = Arc::new(Dispatcher::new(
        backend,
        WorkspaceLinkRegistry::in_memory(),
        OnboardingManager::in_memory(dispatch_config.onboarding_ttl),
        dispatch_config,
    ));

    // ── Channel ──────────────────────────────────────────────────────────
    let channel: Arc<dyn Channel> = match SlackConfig::from_env() {
        Some(slack_config) => {
            let slack = SlackChannel::new(&slack_config);
            if let Err(e) = slack.health_check().await {
                tracing::warn!(error = %e, "Slack auth.test failed, replies may not be delivered");
            }

            let app = slack.router();
            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", slack_config.port))
                .await
                .with_context(|| format!("binding port {}", slack_config.port))?;
            eprintln!(
                "   Slack: events at http://0.0.0.0:{}/slack/events",
                slack_config.port
            );

            tokio::spawn(async move {
                tracing::info!("Slack webhook server started");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "Slack webhook server stopped");
                }
            });

            Arc::new(slack)
        }
        None => {
            eprintln!("   Channel: cli (set SLACK_BOT_TOKEN for Slack)");
            eprintln!("   Type a message and press Enter.\n");
            Arc::new(CliChannel::new())
        }
    };

    pipeline::run(dispatcher, Arc::clone(&channel)).await?;
    channel.shutdown().await?;

    Ok(())
}
