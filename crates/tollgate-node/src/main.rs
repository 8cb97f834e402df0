use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{
    middleware::{Condition, Logger},
    web, App, HttpServer,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::{PaymentVerifier, RpcLedger};
use tollgate_node::{
    catalog, metrics::register_metrics, routes, state::build_http_client, AppState,
    HandlerRegistry, Listing, MeteredDispatcher, NodeConfig, RegistryClient, StatsAggregator,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;
    let enable_request_log = config.enable_request_log;

    tracing::info!("Starting tollgate-node on port {}", port);
    tracing::info!("Wallet: {}", config.wallet_address);
    tracing::debug!(?config, "loaded configuration");

    let http_client = build_http_client(config.default_timeout.max(config.chain_query_timeout))
        .map_err(std::io::Error::other)?;

    // One ledger connection per supported chain
    let mut verifier = PaymentVerifier::new(config.chains.clone(), config.token.clone())
        .with_query_timeout(config.chain_query_timeout);
    for chain in &config.chains {
        let rpc_url = config
            .rpc_urls
            .get(chain)
            .map(String::as_str)
            .unwrap_or_else(|| chain.default_rpc_url());
        tracing::info!(chain = %chain, rpc_url = %rpc_url, "chain enabled");
        let ledger = RpcLedger::new(http_client.clone(), rpc_url)
            .with_timeout(config.chain_query_timeout);
        verifier = verifier.with_ledger(*chain, Arc::new(ledger));
    }

    let handlers = Arc::new(HandlerRegistry::new(
        config.default_price,
        config.default_timeout,
    ));
    if let Err(e) =
        catalog::install_from_config(config.api_catalog.as_deref(), &handlers, &http_client)
    {
        tracing::error!("Failed to install APIs: {e}");
        std::process::exit(1);
    }

    register_metrics();

    let mut dispatcher = MeteredDispatcher::new(
        Arc::new(verifier),
        Arc::clone(&handlers),
        Arc::new(StatsAggregator::new()),
        config.wallet_address.clone(),
    );

    // Registration failure is fatal: an unlisted node serves nobody.
    let registry = match config.registry_url {
        Some(ref registry_url) => {
            let client = Arc::new(
                RegistryClient::new(http_client.clone(), registry_url, &config.provider_id)
                    .with_interval(config.heartbeat_interval)
                    .with_request_timeout(config.registry_timeout),
            );
            let listing = Listing {
                provider_id: config.provider_id.clone(),
                apis: handlers.names(),
                url: config.public_url.clone(),
                prices: handlers.price_table(),
                chains: config.chains.clone(),
            };
            if let Err(e) = client.register(&listing).await {
                tracing::error!("Registry registration failed: {e}");
                std::process::exit(1);
            }
            dispatcher = dispatcher.with_registry(Arc::clone(&client));
            Some(client)
        }
        None => {
            tracing::info!("REGISTRY_URL not set, running unregistered");
            None
        }
    };

    let mut state = AppState::new(config, dispatcher);
    if let Some(ref client) = registry {
        state = state.with_registry(Arc::clone(client));
    }
    let state_data = web::Data::new(state);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .ok_or_else(|| std::io::Error::other("invalid rate limiter config"))?;

    HttpServer::new(move || {
        let cors = tollgate_node::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(10 * 1024 * 1024)) // 10MB body limit
            .wrap(Condition::new(enable_request_log, Logger::default()))
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    // Server has drained; leave the registry.
    if let Some(client) = registry {
        client.unregister().await;
    }
    tracing::info!("tollgate-node stopped");
    Ok(())
}
