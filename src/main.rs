use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Arc;
use std::time::Duration;

mod api;
mod blockchain;
mod config;

use blockchain::{Multichain, SledChainStore, SystemClock};
use config::NodeConfig;

// Open the chain database and load every chain of the namespace
async fn initialize_multichain(config: &NodeConfig) -> anyhow::Result<Multichain> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let store = SledChainStore::new(&config.data_dir)
        .with_context(|| format!("Failed to open chain database at {}", config.data_dir.display()))?;
    info!("Opened chain database at {}", config.data_dir.display());

    let multichain = Multichain::new(
        &config.namespace,
        Arc::new(store),
        config.difficulty,
        Arc::new(SystemClock::new()),
    );

    let loaded = multichain
        .load_all()
        .await
        .context("Failed to load the operator chain")?;
    info!("Loaded {} chains", loaded);

    Ok(multichain)
}

// Wipe every chain on a fixed period
fn schedule_reset(multichain: web::Data<Multichain>, every: Duration) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match multichain.reset().await {
                Ok(count) => info!("Periodic reset done, {} chains loaded", count),
                Err(err) => error!("Periodic reset failed: {}", err),
            }
        }
    });
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::list_chains,
        api::handlers::get_home,
        api::handlers::get_chain,
        api::handlers::validate_chain,
        api::handlers::get_balance,
        api::handlers::get_partner,
        api::handlers::mine,
        api::handlers::transfer
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::NonceRecord,
            blockchain::Address,
            blockchain::AccountSummary,
            api::handlers::HomeResponse,
            api::handlers::ChainResponse,
            api::handlers::BalanceResponse,
            api::handlers::PartnerResponse,
            api::handlers::MineRequest,
            api::handlers::TransferRequest
        )
    ),
    tags(
        (name = "multichain", description = "Multichain ledger endpoints")
    ),
    info(
        title = "Multichain API",
        version = "1.0.0",
        description = "Independent proof-of-work coins hosted side by side",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::parse();
    config.validate().map_err(anyhow::Error::msg)?;
    info!("Namespace: {}", config.namespace);

    let multichain = web::Data::new(initialize_multichain(&config).await?);

    if let Some(secs) = config.reset_interval_secs {
        info!("Chains are wiped every {} seconds", secs);
        schedule_reset(multichain.clone(), Duration::from_secs(secs));
    }

    let bind = (config.host.clone(), config.port);
    let config = web::Data::new(config);

    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(multichain.clone())
            .app_data(config.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
