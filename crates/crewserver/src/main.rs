mod api;
mod error;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use api::AppState;
use crewinvokers::HttpSettings;
use crewruntime::{CrewRuntime, FileStore, InvokerRegistry, MemoryStore, RuntimeConfig, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn build_runtime() -> anyhow::Result<CrewRuntime> {
    let config = match std::env::var("CREW_CONFIG") {
        Ok(path) => RuntimeConfig::load(&PathBuf::from(path))?,
        Err(_) => RuntimeConfig::default(),
    }
    .with_env_overrides();

    let store: Arc<dyn Store> = match std::env::var("CREW_DATA_DIR") {
        Ok(dir) => Arc::new(
            FileStore::open(&dir)
                .await
                .with_context(|| format!("opening data directory {}", dir))?,
        ),
        Err(_) => {
            info!("CREW_DATA_DIR not set, state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let mut registry = InvokerRegistry::new();
    crewinvokers::register_all(&mut registry, HttpSettings::from_env());
    info!("Invokers: {}", registry.list_invokers().join(", "));

    Ok(CrewRuntime::new(store, Arc::new(registry), config))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting crew engine server");

    let runtime = build_runtime().await?;
    let recovered = runtime.recover().await?;
    info!("Runtime ready, {} executions resumed", recovered);

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(api::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
