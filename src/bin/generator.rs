//! Feedgen feed generator
//!
//! Periodically classifies new posts into the `AzPulse` feed collection and
//! keeps that collection under its document ceiling.

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use feedgen::{
    config::GeneratorConfig,
    db::{
        schemas::{FeedEntry, RawPost, POST_COLLECTION},
        Collection, MongoClient,
    },
    generator::{
        az::{az_pulse, FEED_AZ_COLLECTION},
        ClassificationRuleset, Generator,
    },
    logging, tasks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = GeneratorConfig::parse();
    logging::init(&config.log.log_level, config.log.log_format);

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let args = &config.generator;
    let generator_delay = args.feed_az_generator_cron_delay.unwrap_or_default();
    let cutoff_delay = args.feed_az_collection_cutoff_cron_delay.unwrap_or_default();
    let max_documents = args.feed_az_collection_cutoff_cron_max_document.unwrap_or_default();

    let ruleset = match &args.ruleset_file {
        Some(path) => ClassificationRuleset::from_file(path)?,
        None => az_pulse()?,
    };

    info!("======================================");
    info!("  Feedgen feed generator");
    info!("======================================");
    info!("Ruleset: {}", ruleset.name);
    info!("Cursor: {}", args.cursor);
    info!("Generation: every {:?}, batches of {}", generator_delay, args.batch_size);
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
    let feed: Arc<dyn Collection<FeedEntry>> =
        Arc::new(mongo.collection::<FeedEntry>(FEED_AZ_COLLECTION).await?);

    let cancel = CancellationToken::new();
    tasks::cancel_on_shutdown_signal(cancel.clone());

    let generator = Arc::new(Generator::new(posts, Arc::clone(&feed), Arc::new(ruleset)));
    let cursor = args.cursor;
    let batch_size = args.batch_size;
    let run_cancel = cancel.clone();
    let generation = tasks::spawn_periodic("feed_az_generator", generator_delay, cancel.clone(), move || {
        let generator = Arc::clone(&generator);
        let cancel = run_cancel.clone();
        async move { generator.run(&cancel, cursor, batch_size).await }
    });

    let cutoff = tasks::spawn_periodic(
        "feed_az_collection_cutoff",
        cutoff_delay,
        cancel.clone(),
        move || {
            let store = Arc::clone(&feed);
            async move { store.cutoff_by_count(max_documents).await }
        },
    );

    let _ = tokio::join!(generation, cutoff);
    info!("Feedgen feed generator stopped");
    Ok(())
}
