//! Configuration for the feed generator binaries
//!
//! CLI arguments and environment variable handling using clap. Every binary
//! flattens [`MongoArgs`] and [`LogArgs`] next to its own settings and calls
//! `validate()` before starting anything, so all problems are reported at once.

use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use reqwest::Url;

use crate::auth::AuthMode;
use crate::types::{ConsumerCursor, FeedgenError, GeneratorCursor};

/// Database name used by every binary unless overridden
pub const DEFAULT_DB: &str = "main";

/// Parse a duration such as `10s`, `5m`, `720h` or `1h30m15s`.
///
/// A bare `0` is accepted. Anything else needs a unit; the grammar is
/// `humantime`'s, so `2days` and `1h 30m` work too. Out-of-range values are
/// returned as errors rather than wrapped.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(raw).map_err(|e| format!("invalid duration {raw:?}: {e}"))
}

/// Collects validation problems into one aggregated config error
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn require<T>(&mut self, value: &Option<T>, name: &str) {
        if value.is_none() {
            self.0.push(format!("{name} is required"));
        }
    }

    fn positive_duration(&mut self, value: &Option<Duration>, name: &str) {
        match value {
            None => self.0.push(format!("{name} is required")),
            Some(d) if d.is_zero() => self.0.push(format!("{name} must be greater than zero")),
            _ => {}
        }
    }

    fn positive_count(&mut self, value: &Option<u64>, name: &str) {
        match value {
            None => self.0.push(format!("{name} is required")),
            Some(0) => self.0.push(format!("{name} must be greater than zero")),
            _ => {}
        }
    }

    fn push(&mut self, problem: String) {
        self.0.push(problem);
    }

    fn merge(&mut self, result: Result<(), FeedgenError>) {
        match result {
            Ok(()) => {}
            Err(FeedgenError::Config(message)) => self.0.push(message),
            Err(other) => self.0.push(other.to_string()),
        }
    }

    fn finish(self) -> Result<(), FeedgenError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(FeedgenError::Config(self.0.join("; ")))
        }
    }
}

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings shared by every binary
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// MongoDB connection settings
#[derive(Args, Debug, Clone, Default)]
pub struct MongoArgs {
    #[arg(long, env = "MONGODB_HOST")]
    pub mongodb_host: Option<String>,

    #[arg(long, env = "MONGODB_PORT")]
    pub mongodb_port: Option<u16>,

    /// Username, only used together with a password
    #[arg(long, env = "MONGODB_USERNAME")]
    pub mongodb_username: Option<String>,

    #[arg(long, env = "MONGODB_PASSWORD")]
    pub mongodb_password: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = DEFAULT_DB)]
    pub mongodb_db: String,
}

impl MongoArgs {
    fn check(&self, problems: &mut Problems) {
        problems.require(&self.mongodb_host, "MONGODB_HOST");
        problems.require(&self.mongodb_port, "MONGODB_PORT");
        if self.mongodb_username.is_some() != self.mongodb_password.is_some() {
            problems.push(
                "MONGODB_USERNAME and MONGODB_PASSWORD must be set together".to_string(),
            );
        }
    }

    pub fn validate(&self) -> Result<(), FeedgenError> {
        let mut problems = Problems::default();
        self.check(&mut problems);
        problems.finish()
    }

    /// Connection string without credentials
    pub fn uri(&self) -> String {
        format!(
            "mongodb://{}:{}/",
            self.mongodb_host.as_deref().unwrap_or("localhost"),
            self.mongodb_port.unwrap_or(27017)
        )
    }

    /// Username/password pair when both are set and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.mongodb_username.as_deref(), self.mongodb_password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// Settings of the firehose consumer
#[derive(Args, Debug, Clone)]
pub struct ConsumerArgs {
    /// Where to resume the firehose from
    #[arg(long, env = "CONSUMER_CURSOR", value_enum, default_value_t = ConsumerCursor::LastConsumed)]
    pub cursor: ConsumerCursor,

    /// Relay websocket host
    #[arg(long, env = "RELAY_HOST", default_value = "wss://bsky.network")]
    pub relay_host: String,

    /// Posts older than this are dropped on ingest
    #[arg(long, env = "POST_MAX_DATE", value_parser = parse_duration)]
    pub post_max_date: Option<Duration>,

    #[arg(long, env = "POST_COLLECTION_CUTOFF_CRON_DELAY", value_parser = parse_duration)]
    pub post_collection_cutoff_cron_delay: Option<Duration>,

    #[arg(long, env = "POST_COLLECTION_CUTOFF_CRON_MAX_DOCUMENT")]
    pub post_collection_cutoff_cron_max_document: Option<u64>,

    /// How often the ingest buffer is written out
    #[arg(long, env = "FLUSH_INTERVAL", value_parser = parse_duration, default_value = "10s")]
    pub flush_interval: Duration,
}

impl ConsumerArgs {
    pub fn validate(&self) -> Result<(), FeedgenError> {
        let mut problems = Problems::default();
        if !self.relay_host.starts_with("ws://") && !self.relay_host.starts_with("wss://") {
            problems.push(format!(
                "RELAY_HOST must use ws:// or wss://, got '{}'",
                self.relay_host
            ));
        }
        problems.positive_duration(&self.post_max_date, "POST_MAX_DATE");
        problems.positive_duration(
            &self.post_collection_cutoff_cron_delay,
            "POST_COLLECTION_CUTOFF_CRON_DELAY",
        );
        problems.positive_count(
            &self.post_collection_cutoff_cron_max_document,
            "POST_COLLECTION_CUTOFF_CRON_MAX_DOCUMENT",
        );
        if self.flush_interval.is_zero() {
            problems.push("FLUSH_INTERVAL must be greater than zero".to_string());
        }
        problems.finish()
    }
}

/// Settings of the feed generator
#[derive(Args, Debug, Clone)]
pub struct GeneratorArgs {
    /// Where to resume generation from
    #[arg(long, env = "GENERATOR_CURSOR", value_enum, default_value_t = GeneratorCursor::LastGenerated)]
    pub cursor: GeneratorCursor,

    #[arg(long, env = "FEED_AZ_GENERATOR_CRON_DELAY", value_parser = parse_duration)]
    pub feed_az_generator_cron_delay: Option<Duration>,

    #[arg(long, env = "FEED_AZ_COLLECTION_CUTOFF_CRON_DELAY", value_parser = parse_duration)]
    pub feed_az_collection_cutoff_cron_delay: Option<Duration>,

    #[arg(long, env = "FEED_AZ_COLLECTION_CUTOFF_CRON_MAX_DOCUMENT")]
    pub feed_az_collection_cutoff_cron_max_document: Option<u64>,

    /// Accepted posts written per upsert
    #[arg(long, env = "GENERATOR_BATCH_SIZE", default_value = "100")]
    pub batch_size: usize,

    /// JSON ruleset replacing the built-in one
    #[arg(long, env = "RULESET_FILE")]
    pub ruleset_file: Option<std::path::PathBuf>,
}

impl GeneratorArgs {
    pub fn validate(&self) -> Result<(), FeedgenError> {
        let mut problems = Problems::default();
        problems.positive_duration(
            &self.feed_az_generator_cron_delay,
            "FEED_AZ_GENERATOR_CRON_DELAY",
        );
        problems.positive_duration(
            &self.feed_az_collection_cutoff_cron_delay,
            "FEED_AZ_COLLECTION_CUTOFF_CRON_DELAY",
        );
        problems.positive_count(
            &self.feed_az_collection_cutoff_cron_max_document,
            "FEED_AZ_COLLECTION_CUTOFF_CRON_MAX_DOCUMENT",
        );
        if self.batch_size == 0 {
            problems.push("GENERATOR_BATCH_SIZE must be greater than zero".to_string());
        }
        problems.finish()
    }
}

/// Settings of the read API
#[derive(Args, Debug, Clone)]
pub struct ApiArgs {
    /// Public hostname of this service
    #[arg(long, env = "FEEDGEN_HOSTNAME", default_value = "http://localhost")]
    pub feedgen_hostname: String,

    /// DID of the account publishing the feed records
    #[arg(long, env = "FEEDGEN_PUBLISHER_DID", default_value = "did:plc:development")]
    pub feedgen_publisher_did: String,

    #[arg(long, env = "API_PORT")]
    pub api_port: Option<u16>,

    /// How to treat a present but unverifiable bearer token
    #[arg(long, env = "AUTH_MODE", value_enum, default_value_t = AuthMode::BestEffort)]
    pub auth_mode: AuthMode,
}

impl ApiArgs {
    pub fn validate(&self) -> Result<(), FeedgenError> {
        let mut problems = Problems::default();
        if let Err(e) = self.hostname_url() {
            problems.push(e.to_string());
        }
        if !self.feedgen_publisher_did.starts_with("did:") {
            problems.push(format!(
                "FEEDGEN_PUBLISHER_DID is not a DID: '{}'",
                self.feedgen_publisher_did
            ));
        }
        problems.require(&self.api_port, "API_PORT");
        problems.finish()
    }

    /// Hostname as a URL; a bare host gets the `https` scheme
    pub fn hostname_url(&self) -> Result<Url, FeedgenError> {
        let raw = self.feedgen_hostname.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };

        let url = Url::parse(&with_scheme).map_err(|e| {
            FeedgenError::Config(format!("FEEDGEN_HOSTNAME is not a valid URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FeedgenError::Config(format!(
                "invalid scheme '{}' for FEEDGEN_HOSTNAME. Accepted schemes are: '', 'http', 'https'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(FeedgenError::Config("FEEDGEN_HOSTNAME has no host".to_string()));
        }
        Ok(url)
    }

    /// `did:web:<host>` identity of this service
    pub fn service_did(&self) -> Result<String, FeedgenError> {
        let url = self.hostname_url()?;
        Ok(format!("did:web:{}", url.host_str().unwrap_or_default()))
    }
}

/// `feedgen` read API
#[derive(Parser, Debug, Clone)]
#[command(name = "feedgen", version, about = "Feed generator read API")]
pub struct ApiConfig {
    #[command(flatten)]
    pub log: LogArgs,

    #[command(flatten)]
    pub mongo: MongoArgs,

    #[command(flatten)]
    pub api: ApiArgs,
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), FeedgenError> {
        let mut problems = Problems::default();
        problems.merge(self.mongo.validate());
        problems.merge(self.api.validate());
        problems.finish()
    }
}

/// `feedgen-consumer` firehose ingestion
#[derive(Parser, Debug, Clone)]
#[command(name = "feedgen-consumer", version, about = "Firehose consumer")]
pub struct ConsumerConfig {
    #[command(flatten)]
    pub log: LogArgs,

    #[command(flatten)]
    pub mongo: MongoArgs,

    #[command(flatten)]
    pub consumer: ConsumerArgs,
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), FeedgenError> {
        let mut problems = Problems::default();
        problems.merge(self.mongo.validate());
        problems.merge(self.consumer.validate());
        problems.finish()
    }
}

/// `feedgen-generator` feed generation
#[derive(Parser, Debug, Clone)]
#[command(name = "feedgen-generator", version, about = "Feed generator")]
pub struct GeneratorConfig {
    #[command(flatten)]
    pub log: LogArgs,

    #[command(flatten)]
    pub mongo: MongoArgs,

    #[command(flatten)]
    pub generator: GeneratorArgs,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), FeedgenError> {
        let mut problems = Problems::default();
        problems.merge(self.mongo.validate());
        problems.merge(self.generator.validate());
        problems.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(hostname: &str) -> ApiArgs {
        ApiArgs {
            feedgen_hostname: hostname.to_string(),
            feedgen_publisher_did: "did:plc:development".to_string(),
            api_port: Some(8421),
            auth_mode: AuthMode::BestEffort,
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("720h").unwrap(), Duration::from_secs(720 * 3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ten seconds").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        assert!(parse_duration("6000000000000000h").is_err());
        assert!(parse_duration("18446744073709551615s18446744073709551615s").is_err());
        assert!(parse_duration("99999999999999999999999s").is_err());
    }

    #[test]
    fn test_hostname_scheme_handling() {
        assert_eq!(
            api("feed.example.com").hostname_url().unwrap().as_str(),
            "https://feed.example.com/"
        );
        assert_eq!(
            api("http://localhost").service_did().unwrap(),
            "did:web:localhost"
        );
        assert!(api("ftp://feed.example.com").validate().is_err());
    }

    #[test]
    fn test_validation_aggregates_problems() {
        let args = ConsumerArgs {
            cursor: ConsumerCursor::LastConsumed,
            relay_host: "http://bsky.network".to_string(),
            post_max_date: None,
            post_collection_cutoff_cron_delay: Some(Duration::ZERO),
            post_collection_cutoff_cron_max_document: Some(100),
            flush_interval: Duration::from_secs(10),
        };
        let message = args.validate().unwrap_err().to_string();
        assert!(message.contains("RELAY_HOST"));
        assert!(message.contains("POST_MAX_DATE is required"));
        assert!(message.contains("POST_COLLECTION_CUTOFF_CRON_DELAY must be greater than zero"));
    }

    #[test]
    fn test_mongo_credentials_must_pair() {
        let args = MongoArgs {
            mongodb_host: Some("localhost".to_string()),
            mongodb_port: Some(27017),
            mongodb_username: Some("feedgen".to_string()),
            mongodb_password: None,
            mongodb_db: DEFAULT_DB.to_string(),
        };
        assert!(args.validate().is_err());
        assert_eq!(args.uri(), "mongodb://localhost:27017/");
    }

    #[test]
    fn test_binary_config_reports_every_section() {
        let config = ApiConfig::try_parse_from(["feedgen", "--feedgen-hostname", "ftp://x"]).unwrap();
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("MONGODB_HOST is required"));
        assert!(message.contains("API_PORT is required"));
        assert!(message.contains("FEEDGEN_HOSTNAME"));
    }
}
