//! Feedgen read API
//!
//! Serves the feed skeletons written by `feedgen-generator`.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use feedgen::{
    auth::Authenticator,
    config::ApiConfig,
    db::{schemas::FeedEntry, Collection, MongoClient},
    feed::{CollectionFeed, FeedRegistry},
    generator::az::{az_pulse, AZ_PULSE, FEED_AZ_COLLECTION},
    logging,
    server::{self, AppState},
    services::DidResolver,
    tasks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = ApiConfig::parse();
    logging::init(&config.log.log_level, config.log.log_format);

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let api = &config.api;
    let hostname = api.hostname_url()?;
    let service_did = api.service_did()?;
    let service_endpoint = hostname.as_str().trim_end_matches('/').to_string();
    let port = api.api_port.unwrap_or_default();

    info!("======================================");
    info!("  Feedgen read API");
    info!("======================================");
    info!("Hostname: {}", service_endpoint);
    info!("Service DID: {}", service_did);
    info!("Publisher DID: {}", api.feedgen_publisher_did);
    info!("Auth mode: {:?}", api.auth_mode);
    info!("Port: {}", port);
    info!("======================================");

    let mongo = match MongoClient::connect(&config.mongo).await {
        Ok(client) => client,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let entries: Arc<dyn Collection<FeedEntry>> =
        Arc::new(mongo.collection::<FeedEntry>(FEED_AZ_COLLECTION).await?);
    let mut registry = FeedRegistry::new();
    registry.register(Arc::new(
        CollectionFeed::new(AZ_PULSE, api.feedgen_publisher_did.clone(), entries)
            .with_ruleset(Arc::new(az_pulse()?)),
    ));

    let auth = Authenticator::new(api.auth_mode, service_did, Arc::new(DidResolver::new()));
    let state = Arc::new(AppState::new(
        registry,
        auth,
        api.feedgen_publisher_did.clone(),
        service_endpoint,
    ));

    let cancel = CancellationToken::new();
    tasks::cancel_on_shutdown_signal(cancel.clone());

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    server::run(state, listener, cancel).await?;

    info!("Feedgen read API stopped");
    Ok(())
}
