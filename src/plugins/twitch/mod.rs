pub mod auth;
pub mod cli;
pub mod playlist;
pub mod resolver;

use std::collections::HashMap;

pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv";
pub const DEFAULT_USHER_BASE: &str = "http://usher.twitch.tv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitchEndpoints {
    pub api_base: String,
    pub usher_base: String,
    pub client_id: Option<String>,
}

impl Default for TwitchEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            usher_base: DEFAULT_USHER_BASE.to_string(),
            client_id: None,
        }
    }
}

impl TwitchEndpoints {
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        let mut e = Self::default();
        if let Some(v) = options.get("twitch.api_base") {
            e.api_base = v.clone();
        }
        if let Some(v) = options.get("twitch.usher_base") {
            e.usher_base = v.clone();
        }
        e.client_id = options.get("twitch.client_id").cloned();
        e
    }
}
