use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use feedpull::{
    FeedEntry, FeedMeta, FeedSummary, FetchRequest, NoopReporter, ProgressEvent,
    ProgressReporter, ReqwestFetcher, RequestOptions, SharedProgressReporter, fetch_feed,
};

// Emoji with fallback for terminals without Unicode support
static SATELLITE: Emoji<'_, '_> = Emoji("📡 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static NEWSPAPER: Emoji<'_, '_> = Emoji("📰 ", "[i] ");
static HOURGLASS: Emoji<'_, '_> = Emoji("⏳ ", "[.] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");

/// Fetch an RSS or Atom feed and list its entries as they are decoded
#[derive(Parser, Debug)]
#[command(name = "feedpull")]
#[command(about = "Fetch an RSS or Atom feed and list its entries as they are decoded")]
#[command(version)]
struct Args {
    /// URL of the RSS or Atom feed
    url: String,

    /// Extra request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// User-Agent header to send
    #[arg(long)]
    user_agent: Option<String>,

    /// Request timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Maximum number of redirects to follow
    #[arg(long, default_value = "10")]
    max_redirects: usize,

    /// Print the summary, feed info and entries as JSON
    #[arg(long)]
    json: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got \"{raw}\""))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in \"{raw}\""));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let main_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap();

        let main_bar = ProgressBar::new_spinner();
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self { main_bar }
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::ResponseReceived { url, status } => {
                self.main_bar.set_message(format!(
                    "{SEARCH}Decoding {} ({})",
                    url.cyan(),
                    status.to_string().dimmed()
                ));
            }

            ProgressEvent::FeedInfo { url, title } => {
                self.main_bar.println(format!(
                    "{NEWSPAPER}{} • {}",
                    title.as_deref().unwrap_or("(untitled)").bold().green(),
                    url.cyan()
                ));
            }

            ProgressEvent::EntryDecoded { index, title } => {
                self.main_bar.println(format!(
                    "  {} {}",
                    format!("[{index}]").dimmed(),
                    truncate_title(title.as_deref().unwrap_or("(untitled)"), 72)
                ));
                self.main_bar
                    .set_message(format!("{SEARCH}{} entries decoded", index.to_string().cyan()));
            }

            ProgressEvent::AwaitingHandlers { pending } => {
                self.main_bar.set_message(format!(
                    "{HOURGLASS}Waiting for {} handlers",
                    pending.to_string().yellow()
                ));
            }

            ProgressEvent::FetchCompleted { url, entry_count } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{SUCCESS}{} {} entries from {}",
                    "Fetch complete:".bold().green(),
                    entry_count.to_string().green().bold(),
                    url.cyan()
                );
            }

            ProgressEvent::FetchFailed { url, error } => {
                self.main_bar.abandon_with_message(format!(
                    "{FAILURE}{} - {}",
                    url.red(),
                    error.red()
                ));
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let truncated: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

#[derive(Serialize)]
struct JsonOutput {
    summary: FeedSummary,
    info: Option<FeedMeta>,
    entries: Vec<FeedEntry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let show_progress = !args.quiet && !args.json;

    if show_progress {
        println!(
            "\n{}{} {}\n",
            SATELLITE,
            "feedpull".bold().magenta(),
            "- Feed Fetcher".dimmed()
        );
    }

    let fetcher = ReqwestFetcher::with_max_redirects(args.max_redirects)
        .context("Failed to set up HTTP client")?;

    let mut options = RequestOptions {
        headers: args.headers.clone(),
        user_agent: args.user_agent.clone(),
        timeout: None,
    };
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let reporter: SharedProgressReporter = if show_progress {
        Arc::new(IndicatifReporter::new())
    } else {
        NoopReporter::shared()
    };

    let info: Arc<Mutex<Option<FeedMeta>>> = Arc::new(Mutex::new(None));
    let entries: Arc<Mutex<Vec<FeedEntry>>> = Arc::new(Mutex::new(Vec::new()));

    let mut request = FetchRequest::new(args.url.clone())
        .with_options(options)
        .with_reporter(reporter);

    if args.json {
        let info = info.clone();
        let entries = entries.clone();
        request = request
            .on_info(move |meta| {
                if let Ok(mut slot) = info.lock() {
                    *slot = Some(meta);
                }
                async { Ok(()) }
            })
            .on_entry(move |entry| {
                if let Ok(mut collected) = entries.lock() {
                    collected.push(entry);
                }
                async { Ok(()) }
            });
    }

    let summary = fetch_feed(&fetcher, request)
        .await
        .with_context(|| format!("Failed to fetch feed {}", args.url))?;

    if args.json {
        let output = JsonOutput {
            summary,
            info: info.lock().ok().and_then(|mut slot| slot.take()),
            entries: entries
                .lock()
                .map(|mut collected| std::mem::take(&mut *collected))
                .unwrap_or_default(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialize output")?
        );
    } else if args.quiet {
        println!("{}\t{}", summary.url, summary.entry_count);
    }

    Ok(())
}
