use serde::Deserialize;

use crate::plugins::registry::{AccessToken, SourceError};
use crate::plugins::twitch::TwitchEndpoints;

#[derive(Debug, Deserialize)]
struct AccessResponse {
    sig: String,
    token: String,
}

pub fn access_token_url(endpoints: &TwitchEndpoints, video_id: u64) -> String {
    format!(
        "{}/api/vods/{}/access_token?as3=t",
        endpoints.api_base.trim_end_matches('/'),
        video_id
    )
}

pub async fn fetch_access_token(
    client: &reqwest::Client,
    endpoints: &TwitchEndpoints,
    video_id: u64,
) -> Result<AccessToken, SourceError> {
    let url = access_token_url(endpoints, video_id);
    let mut req = client.get(&url);
    if let Some(id) = &endpoints.client_id {
        req = req.header("Client-ID", id);
    }

    let resp = req
        .send()
        .await
        .map_err(|source| SourceError::Transport { url: url.clone(), source })?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status { url, status });
    }

    let r: AccessResponse = resp.json().await.map_err(|source| {
        if source.is_decode() {
            SourceError::MalformedToken(source.to_string())
        } else {
            SourceError::Transport { url: url.clone(), source }
        }
    })?;

    Ok(AccessToken { signature: r.sig, token: r.token })
}
