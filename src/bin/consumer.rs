//! Feedgen firehose consumer
//!
//! Streams post records from the relay into the `post` collection and keeps
//! that collection under its document ceiling.

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use feedgen::{
    config::ConsumerConfig,
    db::{
        schemas::{RawPost, POST_COLLECTION},
        Collection, MongoClient,
    },
    firehose::Firehose,
    ingest::{self, BufferConfig},
    logging, tasks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = ConsumerConfig::parse();
    logging::init(&config.log.log_level, config.log.log_format);

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let args = &config.consumer;
    let max_age = args.post_max_date.unwrap_or_default();
    let cutoff_delay = args.post_collection_cutoff_cron_delay.unwrap_or_default();
    let max_documents = args.post_collection_cutoff_cron_max_document.unwrap_or_default();

    info!("======================================");
    info!("  Feedgen firehose consumer");
    info!("======================================");
    info!("Relay: {}", args.relay_host);
    info!("Cursor: {}", args.cursor);
    info!("Post max age: {:?}", max_age);
    info!("Flush interval: {:?}", args.flush_interval);
    info!("Cutoff: every {:?}, keep {} documents", cutoff_delay, max_documents);
    info!("======================================");

    let mongo = match MongoClient::connect(&config.mongo).await {
        Ok(client) => client,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };
    let posts: Arc<dyn Collection<RawPost>> =
        Arc::new(mongo.collection::<RawPost>(POST_COLLECTION).await?);

    let cancel = CancellationToken::new();
    tasks::cancel_on_shutdown_signal(cancel.clone());

    let cutoff_store = Arc::clone(&posts);
    let cutoff = tasks::spawn_periodic(
        "post_collection_cutoff",
        cutoff_delay,
        cancel.clone(),
        move || {
            let store = Arc::clone(&cutoff_store);
            async move { store.cutoff_by_count(max_documents).await }
        },
    );

    let source = Arc::new(Firehose::new(args.relay_host.clone()));
    let outcome = ingest::run(
        cancel.clone(),
        posts,
        source,
        args.cursor,
        BufferConfig::new(max_age, args.flush_interval),
    )
    .await;

    cancel.cancel();
    let _ = cutoff.await;

    match outcome {
        Ok(()) => {
            info!("Feedgen firehose consumer stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Firehose consumer failed");
            Err(e.into())
        }
    }
}
