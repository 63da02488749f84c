use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH};
use std::time::Duration;

use crate::core::error::FetchError;
use crate::core::model::Segment;
use crate::plugins::registry::{DriverContext, SegmentFetcher};

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new(ctx: DriverContext) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(ctx.user_agent.clone())
            .timeout(Duration::from_secs(ctx.timeout_secs.max(1)))
            .default_headers(Self::build_headers(&ctx)?)
            .build()?;
        Ok(Self { client })
    }

    pub fn build_headers(ctx: &DriverContext) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        for (k, v) in &ctx.headers {
            let name = HeaderName::from_bytes(k.as_bytes())?;
            let value = HeaderValue::from_str(v)?;
            h.insert(name, value);
        }
        Ok(h)
    }

    fn transport(url: &str, source: reqwest::Error) -> FetchError {
        FetchError::Transport { url: url.to_string(), source }
    }
}

#[async_trait]
impl SegmentFetcher for HttpDriver {
    fn name(&self) -> &'static str { "http-driver" }

    async fn fetch(&self, segment: &Segment) -> Result<Bytes, FetchError> {
        // Body and HEAD length must count the same bytes, so no transfer compression.
        let resp = self.client
            .get(&segment.url)
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await
            .map_err(|e| Self::transport(&segment.url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: segment.url.clone(), status });
        }

        resp.bytes().await.map_err(|e| Self::transport(&segment.url, e))
    }

    async fn content_length(&self, segment: &Segment) -> Result<u64, FetchError> {
        let head = self.client
            .head(&segment.url)
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await
            .map_err(|e| Self::transport(&segment.url, e))?;

        let status = head.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: segment.url.clone(), status });
        }

        // HEAD has no body, so read the header rather than the body size hint.
        head.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| FetchError::MissingLength { url: segment.url.clone() })
    }
}
