use wacrm_api::app::{self, services, InMemoryBackends};
use wacrm_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ApiConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            wacrm_observability::init();
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    wacrm_observability::init_with_level(&config.worker.log_level);

    if let Err(e) = run(config).await {
        tracing::error!(error = %format!("{e:#}"), "api failed");
        return Err(e);
    }
    Ok(())
}

async fn run(config: ApiConfig) -> anyhow::Result<()> {
    if config.jwt_secret_defaulted {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let services = if config.worker.database_url.is_some() {
        services::build_persistent_services(&config).await?
    } else {
        tracing::warn!("DATABASE_URL not set; using in-memory backends");
        InMemoryBackends::new(config.worker.exports_dir.clone())
            .services(&config.worker.queue, services::download_tokens(&config))
    };

    let app = app::build_app(services, &config.jwt_secret);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
