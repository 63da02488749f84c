use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use clap::{ArgMatches, Command};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::FetchError;
use crate::core::model::Segment;

#[derive(Debug, Clone)]
pub struct DriverContext {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub headers: HashMap<String, String>,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            user_agent: concat!("vodgrab/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 60,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadCliConfig {
    pub options: HashMap<String, String>,
    pub driver_ctx: DriverContext,
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_download_command(&self, cmd: Command) -> Command;
    fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()>;
}

/// Moves segment bytes. Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, segment: &Segment) -> Result<Bytes, FetchError>;

    /// Length-only probe; used by the resolver to find where a segment group ends.
    async fn content_length(&self, segment: &Segment) -> Result<u64, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRef {
    pub id: u64,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub signature: String,
    pub token: String,
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("could not reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("received status {status} while getting {url}")]
    Status { url: String, status: StatusCode },

    #[error("could not decode access token response: {0}")]
    MalformedToken(String),

    #[error("malformed playlist {url}: {reason}")]
    MalformedPlaylist { url: String, reason: String },

    #[error("invalid request configuration: {0}")]
    Config(String),

    #[error("could not find requested quality {requested:?}, available: {available:?}")]
    QualityNotFound { requested: String, available: Vec<String> },
}

/// Authorization exchange plus playlist acquisition for one kind of stream reference.
#[async_trait]
pub trait StreamSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse_input(&self, raw: &str) -> Option<StreamRef>;

    async fn access_token(&self, stream: &StreamRef, cfg: &DownloadCliConfig) -> Result<AccessToken, SourceError>;

    async fn segments(
        &self,
        stream: &StreamRef,
        quality: &str,
        token: &AccessToken,
        cfg: &DownloadCliConfig,
    ) -> Result<Vec<Segment>, SourceError>;
}

pub struct PluginRegistry {
    sources: Vec<Box<dyn StreamSource>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { sources: vec![], cli_plugins: vec![] };

        reg.sources.push(Box::new(crate::plugins::twitch::resolver::TwitchSource::new()));

        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        reg.cli_plugins.push(Box::new(crate::plugins::twitch::cli::TwitchCliPlugin::new()));
        reg
    }

    pub fn augment_download_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_download_command(c))
    }

    pub fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_download_matches(matches, cfg)
                .with_context(|| format!("{} options", p.name()))?;
        }
        Ok(())
    }

    /// First source that recognizes the input, with the parsed reference.
    pub fn source_for(&self, raw: &str) -> Option<(&dyn StreamSource, StreamRef)> {
        self.sources
            .iter()
            .find_map(|s| s.parse_input(raw).map(|r| (s.as_ref(), r)))
    }

    pub fn fetcher(&self, ctx: &DriverContext) -> anyhow::Result<Arc<dyn SegmentFetcher>> {
        Ok(Arc::new(crate::plugins::http::driver::HttpDriver::new(ctx.clone())?))
    }
}
