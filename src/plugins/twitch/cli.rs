use crate::plugins::registry::{CliPlugin, DownloadCliConfig};
use clap::{Arg, ArgMatches, Command};

pub struct TwitchCliPlugin;

impl TwitchCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl CliPlugin for TwitchCliPlugin {
    fn name(&self) -> &'static str {
        "twitch"
    }

    fn augment_download_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("twitch_api_base")
                .long("api-base")
                .help_heading("Twitch")
                .help("Base URL of the access token API")
                .num_args(1),
        )
        .arg(
            Arg::new("twitch_usher_base")
                .long("usher-base")
                .help_heading("Twitch")
                .help("Base URL of the playlist service")
                .num_args(1),
        )
        .arg(
            Arg::new("twitch_client_id")
                .long("client-id")
                .help_heading("Twitch")
                .help("Client-ID header sent with the access token request")
                .num_args(1),
        )
    }

    fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()> {
        for (arg, key) in [
            ("twitch_api_base", "twitch.api_base"),
            ("twitch_usher_base", "twitch.usher_base"),
            ("twitch_client_id", "twitch.client_id"),
        ] {
            if let Some(v) = matches.get_one::<String>(arg) {
                cfg.options.insert(key.to_string(), v.clone());
            }
        }
        Ok(())
    }
}
