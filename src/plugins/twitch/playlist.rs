use url::Url;

use crate::plugins::registry::SourceError;

/// URI lines of an M3U playlist, resolved against the playlist's own URL.
pub fn parse_entries(text: &str, base: &Url) -> Result<Vec<String>, SourceError> {
    let mut out = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let abs = base.join(line).map_err(|e| SourceError::MalformedPlaylist {
            url: base.to_string(),
            reason: format!("bad entry {:?}: {}", line, e),
        })?;
        out.push(abs.to_string());
    }
    Ok(out)
}

/// Quality name of a variant playlist: the directory holding it, e.g. `.../720p60/index-dvr.m3u8`.
pub fn quality_of(variant: &str) -> Option<String> {
    let u = Url::parse(variant).ok()?;
    let segs: Vec<&str> = u.path_segments()?.collect();
    if segs.len() < 2 {
        return None;
    }
    let q = segs[segs.len() - 2];
    (!q.is_empty()).then(|| q.to_string())
}

pub fn select_variant(variants: &[String], quality: &str) -> Result<String, SourceError> {
    let mut available = Vec::with_capacity(variants.len());
    let mut chosen = None;
    for v in variants {
        let Some(q) = quality_of(v) else { continue };
        if q == quality && chosen.is_none() {
            chosen = Some(v.clone());
        }
        available.push(q);
    }
    chosen.ok_or_else(|| SourceError::QualityNotFound {
        requested: quality.to_string(),
        available,
    })
}

pub async fn download_entries(client: &reqwest::Client, url: &str) -> Result<Vec<String>, SourceError> {
    let base = Url::parse(url).map_err(|e| SourceError::MalformedPlaylist {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let resp = client
        .get(base.clone())
        .send()
        .await
        .map_err(|source| SourceError::Transport { url: url.to_string(), source })?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status { url: url.to_string(), status });
    }
    let text = resp
        .text()
        .await
        .map_err(|source| SourceError::Transport { url: url.to_string(), source })?;
    tracing::debug!(url, bytes = text.len(), "playlist downloaded");
    parse_entries(&text, &base)
}
