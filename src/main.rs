use anyhow::Context;
use docmill::audit;
use docmill::config::Config;
use docmill::engines::ConvertOptions;
use docmill::handlers::AppState;
use docmill::pipeline::Pipeline;
use docmill::registry::ConverterRegistry;
use docmill::workspace::WorkspaceManager;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docmill=info,tower_http=info".into()),
        )
        .init();

    let config = Config::load().context("invalid configuration")?;

    // Probe engines once; availability is cached for the process lifetime
    let registry = ConverterRegistry::new(&config).await;
    let audit = audit::from_url(config.audit_database_url.as_deref()).await;

    let pipeline = Pipeline::new(
        WorkspaceManager::new(&config.workspace_root),
        registry,
        audit,
        ConvertOptions {
            images_on_own_page: config.images_on_own_page,
        },
    );
    let state = Arc::new(AppState { pipeline });
    let app = docmill::build_app(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!("🚀 docmill running on http://{}", config.addr);
    info!("📖 API documentation: http://{}/info", config.addr);
    info!("📂 Workspaces under {}", config.workspace_root.display());

    axum::serve(listener, app).await?;
    Ok(())
}
