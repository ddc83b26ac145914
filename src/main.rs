use std::sync::Arc;

use formbot::channels::TelegramGateway;
use formbot::config::BotConfig;
use formbot::form::{DialogueEngine, SessionStore, spawn_expiry_task};
use formbot::webhook::webhook_routes;

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

    let config = BotConfig::from_env();

    if config.telegram_token.is_none() {
        tracing::warn!("TELEGRAM_TOKEN is not set; replies to users will fail");
    }

    if !config.template_path.exists() {
        tracing::warn!(
            path = %config.template_path.display(),
            "Document template not found; completed forms will report an error"
        );
    }

    eprintln!("📄 Formbot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Template: {}", config.template_path.display());
    eprintln!("   Webhook: http://0.0.0.0:{}/", config.port);

    // ── Sessions ─────────────────────────────────────────────────────────
    let store = SessionStore::new();
    match config.session_idle_timeout {
        Some(idle) => {
            let _expiry_handle = spawn_expiry_task(Arc::clone(&store), chrono::Duration::from_std(idle)?);
            eprintln!("   Session idle expiry: {} min", idle.as_secs() / 60);
        }
        None => eprintln!("   Session idle expiry: disabled"),
    }

    // ── Dialogue ─────────────────────────────────────────────────────────
    let gateway = Arc::new(TelegramGateway::new(
        config.telegram_token.clone(),
        config.telegram_api_base.clone(),
        config.send_timeout,
    ));
    let engine = Arc::new(DialogueEngine::from_config(&config, store, gateway)?);

    eprintln!("   Fields: {}", engine.catalog().len());

    let app = webhook_routes(engine);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "Bot server started");
    axum::serve(listener, app).await?;

    Ok(())
}
