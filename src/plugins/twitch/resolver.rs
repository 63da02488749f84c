use async_trait::async_trait;
use sanitize_filename::sanitize;
use std::time::Duration;
use url::Url;

use crate::core::model::Segment;
use crate::plugins::http::driver::HttpDriver;
use crate::plugins::registry::{AccessToken, DownloadCliConfig, SourceError, StreamRef, StreamSource};
use crate::plugins::twitch::auth::fetch_access_token;
use crate::plugins::twitch::playlist::{download_entries, select_variant};
use crate::plugins::twitch::TwitchEndpoints;

pub struct TwitchSource;

impl TwitchSource {
    pub fn new() -> Self { Self }

    fn is_twitch_host(host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        host == "twitch.tv" || host.ends_with(".twitch.tv")
    }

    /// Accepts a bare numeric id, `twitch.tv/<channel>/v/<id>` or `twitch.tv/videos/<id>`.
    pub fn parse_video_id(raw: &str) -> Option<u64> {
        if let Ok(id) = raw.trim().parse::<u64>() {
            return Some(id);
        }

        let u = Url::parse(raw.trim()).ok()?;
        if !matches!(u.scheme(), "http" | "https") || !Self::is_twitch_host(u.host_str()?) {
            return None;
        }
        let seg: Vec<&str> = u.path_segments()?.filter(|s| !s.is_empty()).collect();
        match seg.as_slice() {
            [_, "v", id, ..] | ["videos", id, ..] => id.parse().ok(),
            _ => None,
        }
    }

    fn client(cfg: &DownloadCliConfig) -> Result<reqwest::Client, SourceError> {
        let headers = HttpDriver::build_headers(&cfg.driver_ctx)
            .map_err(|e| SourceError::Config(format!("{:#}", e)))?;
        reqwest::Client::builder()
            .user_agent(cfg.driver_ctx.user_agent.clone())
            .timeout(Duration::from_secs(cfg.driver_ctx.timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::Config(e.to_string()))
    }

    pub fn master_playlist_url(endpoints: &TwitchEndpoints, video_id: u64, token: &AccessToken) -> String {
        let raw = format!("{}/vod/{}", endpoints.usher_base.trim_end_matches('/'), video_id);
        match Url::parse(&raw) {
            Ok(mut u) => {
                u.query_pairs_mut()
                    .append_pair("nauthsig", &token.signature)
                    .append_pair("nauth", &token.token);
                u.to_string()
            }
            Err(_) => raw,
        }
    }
}

/// Output file for a stream: `<name>.ts`, or `<id>.ts` when no name was given.
pub fn output_file_name(name: Option<&str>, stream: &StreamRef) -> String {
    let stem = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => sanitize(n),
        None => stream.id.to_string(),
    };
    format!("{}.ts", stem)
}

#[async_trait]
impl StreamSource for TwitchSource {
    fn name(&self) -> &'static str { "twitch" }

    fn parse_input(&self, raw: &str) -> Option<StreamRef> {
        let id = Self::parse_video_id(raw)?;
        Some(StreamRef { id, display_name: format!("v{}", id) })
    }

    async fn access_token(&self, stream: &StreamRef, cfg: &DownloadCliConfig) -> Result<AccessToken, SourceError> {
        let endpoints = TwitchEndpoints::from_options(&cfg.options);
        let client = Self::client(cfg)?;
        fetch_access_token(&client, &endpoints, stream.id).await
    }

    async fn segments(
        &self,
        stream: &StreamRef,
        quality: &str,
        token: &AccessToken,
        cfg: &DownloadCliConfig,
    ) -> Result<Vec<Segment>, SourceError> {
        let endpoints = TwitchEndpoints::from_options(&cfg.options);
        let client = Self::client(cfg)?;

        let master = Self::master_playlist_url(&endpoints, stream.id, token);
        let variants = download_entries(&client, &master).await?;
        let variant = select_variant(&variants, quality)?;
        tracing::info!(quality, variant = %variant, "selected variant playlist");

        let urls = download_entries(&client, &variant).await?;
        if urls.is_empty() {
            return Err(SourceError::MalformedPlaylist { url: variant, reason: "no segments".to_string() });
        }
        Ok(Segment::sequence(urls))
    }
}
