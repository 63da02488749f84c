mod core;
mod i18n;
mod logging;
mod plugins;
#[cfg(test)]
mod testutil;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use crate::core::engine::Engine;
use crate::core::events::EngineEvent;
use crate::core::model::{RunOutcome, RunRequest};
use crate::i18n::{Locale, Messages};
use crate::plugins::registry::{DownloadCliConfig, PluginRegistry};
use crate::plugins::twitch::resolver::output_file_name;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio::sync::broadcast;

fn build_cli(registry: &PluginRegistry) -> Command {
    let cmd = Command::new("vodgrab")
        .about("Download a Twitch VOD into a single .ts file, with parallel segment fetching and resume")
        .arg_required_else_help(true)
        .arg(
            Arg::new("video")
                .help("Video id or twitch.tv url containing /v/<id> or /videos/<id>")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("quality")
                .short('q')
                .long("quality")
                .help("Video quality")
                .default_value("high")
                .num_args(1),
        )
        .arg(
            Arg::new("start")
                .short('p')
                .long("start")
                .help("First segment index to download")
                .default_value("0")
                .num_args(1),
        )
        .arg(
            Arg::new("end")
                .short('e')
                .long("end")
                .help("Last segment index to download (defaults to the whole video)")
                .num_args(1),
        )
        .arg(
            Arg::new("concurrency")
                .short('j')
                .long("concurrency")
                .help("Max segments fetched at the same time")
                .default_value("4")
                .num_args(1),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .help("Name to save as, without extension (defaults to the video id)")
                .num_args(1),
        )
        .arg(
            Arg::new("out_dir")
                .long("out-dir")
                .help("Output directory")
                .default_value(".")
                .num_args(1),
        )
        .arg(
            Arg::new("continue")
                .short('c')
                .long("continue")
                .help("Continue an interrupted download")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("locale")
                .long("locale")
                .help("Message language (en, zh)")
                .default_value("en")
                .num_args(1),
        );

    registry.augment_download_command(cmd)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOptions {
    video: String,
    quality: String,
    start: usize,
    end: Option<usize>,
    concurrency: usize,
    name: Option<String>,
    out_dir: PathBuf,
    resume: bool,
    locale: Locale,
}

impl RunOptions {
    fn from_matches(m: &ArgMatches) -> anyhow::Result<Self> {
        let get = |id: &str| m.get_one::<String>(id).cloned();
        Ok(Self {
            video: get("video").context("missing video")?,
            quality: get("quality").unwrap_or_else(|| "high".to_string()),
            start: get("start").as_deref().unwrap_or("0").parse().context("--start")?,
            end: get("end").map(|s| s.parse()).transpose().context("--end")?,
            concurrency: get("concurrency").as_deref().unwrap_or("4").parse().context("--concurrency")?,
            name: get("name"),
            out_dir: get("out_dir").unwrap_or_else(|| ".".to_string()).into(),
            resume: m.get_flag("continue"),
            locale: Locale::from_str(get("locale").as_deref().unwrap_or("en")),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let registry = PluginRegistry::with_defaults();
    let matches = build_cli(&registry).get_matches();
    let opts = RunOptions::from_matches(&matches)?;

    let mut cfg = DownloadCliConfig::default();
    registry.apply_download_matches(&matches, &mut cfg)?;
    let msgs = i18n::get_messages(opts.locale);

    let (source, stream) = registry.source_for(&opts.video).with_context(|| {
        format!(
            "unrecognized video reference: {} (only ids and twitch urls containing /v/ or /videos/ are supported)",
            opts.video
        )
    })?;

    println!("[{}] {} ({})", msgs.info_prefix, msgs.fetching_token, stream.display_name);
    let token = source
        .access_token(&stream, &cfg)
        .await
        .context("could not get access token")?;

    println!("[{}] {} ({})", msgs.info_prefix, msgs.fetching_playlist, opts.quality);
    let segments = source
        .segments(&stream, &opts.quality, &token, &cfg)
        .await
        .context("could not get playlist")?;
    println!("[{}] {} {}", msgs.info_prefix, segments.len(), msgs.segments_found);

    let output = opts.out_dir.join(output_file_name(opts.name.as_deref(), &stream));
    let engine = Engine::new(registry.fetcher(&cfg.driver_ctx)?);
    let ui_task = tokio::spawn(render_progress(engine.subscribe(), msgs));

    let result = engine
        .run(
            segments,
            RunRequest {
                output: output.clone(),
                start: opts.start,
                end: opts.end,
                concurrency: opts.concurrency,
                resume: opts.resume,
            },
        )
        .await;

    // Closing the last sender ends the progress task.
    drop(engine);
    let _ = ui_task.await;

    match result.with_context(|| format!("downloading {}", output.display()))? {
        RunOutcome::NothingToResume => {
            eprintln!("{}", msgs.nothing_to_resume);
        }
        RunOutcome::Completed(summary) => {
            println!();
            println!("{}:", msgs.summary_header);
            println!(
                "- status={} {} {} {} path={}",
                msgs.status_done,
                summary.segments_written,
                msgs.segments_label,
                fmt_bytes(summary.bytes_written),
                output.display()
            );
            if let Some(prev) = summary.resumed_from {
                println!("- {} {}", msgs.resumed, fmt_bytes(prev));
            }
        }
    }

    Ok(())
}

async fn render_progress(mut rx: broadcast::Receiver<EngineEvent>, msgs: &'static Messages) {
    let sty_bar = ProgressStyle::with_template(
        "{prefix} {bar:40.cyan/blue} {pos}/{len} {msg} ({elapsed_precise}, eta {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());

    let mut bar: Option<ProgressBar> = None;

    loop {
        let evt = match rx.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Some(line) = event_line(&evt, msgs) {
            match &bar {
                Some(pb) => pb.println(line),
                None => eprintln!("{}", line),
            }
        }

        match evt {
            EngineEvent::RunStarted { window, total_segments, .. } => {
                let pb = ProgressBar::new(window.len() as u64);
                pb.set_style(sty_bar.clone());
                pb.set_prefix(format!("[{}-{} of {}]", window.start, window.end, total_segments));
                bar = Some(pb);
            }
            EngineEvent::SegmentWritten { output_bytes, .. } => {
                if let Some(pb) = &bar {
                    pb.inc(1);
                    pb.set_message(fmt_bytes(output_bytes));
                }
            }
            EngineEvent::Finished { .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message(msgs.status_done.to_string());
                }
            }
            // The error itself is reported once, by main on exit.
            EngineEvent::Error { .. } => {
                if let Some(pb) = bar.take() {
                    pb.abandon_with_message(msgs.status_failed.to_string());
                }
            }
            EngineEvent::Resumed { .. } | EngineEvent::Info { .. } => {}
        }
    }
}

/// Text printed above the progress bar for an event, if any.
fn event_line(evt: &EngineEvent, msgs: &Messages) -> Option<String> {
    match evt {
        EngineEvent::Resumed { state, recovered, .. } => Some(format!(
            "[{}] {}: {} on disk, segment {} +{}, next {}",
            msgs.info_prefix,
            msgs.resumed,
            fmt_bytes(state.output_length),
            state.partial_index,
            fmt_bytes(*recovered),
            state.resume_index
        )),
        EngineEvent::Info { scope, message } => Some(format!("[{}] {}: {}", msgs.info_prefix, scope, message)),
        _ => None,
    }
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.2}GiB", f / GB)
    } else if f >= MB {
        format!("{:.2}MiB", f / MB)
    } else if f >= KB {
        format!("{:.2}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<RunOptions> {
        let registry = PluginRegistry::with_defaults();
        let m = build_cli(&registry).try_get_matches_from(args)?;
        RunOptions::from_matches(&m)
    }

    #[test]
    fn defaults_when_only_video_given() {
        let o = parse(&["vodgrab", "12345"]).unwrap();
        assert_eq!(o.video, "12345");
        assert_eq!(o.quality, "high");
        assert_eq!(o.start, 0);
        assert_eq!(o.end, None);
        assert_eq!(o.concurrency, 4);
        assert!(!o.resume);
        assert_eq!(o.locale, Locale::En);
    }

    #[test]
    fn short_flags_are_accepted() {
        let o = parse(&["vodgrab", "-c", "-q", "720p60", "-p", "3", "-e", "9", "-j", "8", "-n", "show", "42"]).unwrap();
        assert!(o.resume);
        assert_eq!(o.quality, "720p60");
        assert_eq!((o.start, o.end, o.concurrency), (3, Some(9), 8));
        assert_eq!(o.name.as_deref(), Some("show"));
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(parse(&["vodgrab", "-j", "many", "1"]).is_err());
        assert!(parse(&["vodgrab", "-e", "-2", "1"]).is_err());
    }

    #[test]
    fn only_resume_and_info_events_print_lines() {
        let msgs = i18n::get_messages(Locale::En);
        let err = EngineEvent::Error { scope: "run(x)".to_string(), message: "boom".to_string() };
        assert_eq!(event_line(&err, msgs), None);

        let info = EngineEvent::Info { scope: "resume".to_string(), message: "fresh file".to_string() };
        assert_eq!(event_line(&info, msgs).as_deref(), Some("[INFO] resume: fresh file"));
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(fmt_bytes(512), "512B");
        assert_eq!(fmt_bytes(2048), "2.00KiB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.00MiB");
    }
}
