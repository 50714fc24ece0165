//! poliwatch CLI
//!
//! Follows the wiki edit feed and posts screenshots of politician article
//! diffs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use poliwatch::{
    error::{AppError, Result},
    models::{Config, EditEvent, Length, Revision, Subject},
    pipeline,
    services::{EditClassifier, InterestPredicate, MarkupFilter},
    utils::{html, http},
};

/// poliwatch - Politician Wiki Edit Watcher
#[derive(Parser, Debug)]
#[command(
    name = "poliwatch",
    version,
    about = "Posts screenshots of edits to politicians' wiki articles"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the feed and publish notifications
    Run {
        /// Write posts to this directory instead of publishing
        #[arg(long)]
        dry_run: Option<PathBuf>,
    },

    /// Fetch the subject directory and show a sample
    Subjects {
        /// Number of subjects to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Validate configuration
    Validate,

    /// Run admission on a hand-made edit
    Check {
        title: String,
        old_revision: u64,
        new_revision: u64,
        old_length: u64,
        new_length: u64,
    },

    /// Fetch a diff page and show its changed fragments
    Inspect { url: String },
}

/// Initialize logging based on verbosity flag.
#[cfg(not(feature = "json-log"))]
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Initialize JSON logging for container deployments.
#[cfg(feature = "json-log")]
fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(verbose, "JSON logging enabled");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env();

    match cli.command {
        Command::Run { dry_run } => {
            config.validate()?;
            log::info!("poliwatch starting on {}...", config.wiki.name);

            tokio::select! {
                stats = pipeline::run_watcher(&config, dry_run) => {
                    let stats = stats?;
                    log::info!("Stopped after {} edits, {} posted", stats.received, stats.published);
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    log::info!("Interrupted, shutting down");
                }
            }
        }

        Command::Subjects { limit } => {
            let index = pipeline::load_subjects(&config).await?;
            log::info!("Loaded {} subjects", index.len());

            let mut subjects: Vec<&Subject> = index.iter().collect();
            subjects.sort_by(|a, b| a.page_title.cmp(&b.page_title));
            for subject in subjects.into_iter().take(limit) {
                log::info!(
                    "  {} | {} {} | {}",
                    subject.page_title,
                    subject.first_name,
                    subject.last_name,
                    subject.affiliation_tag.as_deref().unwrap_or("-")
                );
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }

        Command::Check {
            title,
            old_revision,
            new_revision,
            old_length,
            new_length,
        } => {
            let event = EditEvent {
                kind: "edit".to_string(),
                title: title.clone(),
                wiki: config.wiki.name.clone(),
                revision: Revision {
                    old: old_revision,
                    new: new_revision,
                },
                length: Length {
                    old: old_length,
                    new: new_length,
                },
                ..EditEvent::default()
            };
            let subject = Subject {
                page_title: title,
                ..Subject::default()
            };

            let classifier = EditClassifier::new(&config.wiki.host, &config.classifier);
            match classifier.admit(&event, &subject) {
                Ok(diff) => log::info!("Admitted: {}", diff),
                Err(rejection) => log::info!("Rejected: {}", rejection),
            }
        }

        Command::Inspect { url } => {
            let client = http::create_client(&config.stream.user_agent, config.subjects.timeout_secs)?;
            let document = http::fetch_page(&client, &url).await?;
            let fragments = html::diff_fragments(&document)?;
            if fragments.is_empty() {
                return Err(AppError::validation(format!("no diff fragments found at {url}")));
            }

            let filter = MarkupFilter::new(config.capture.min_fragment_chars);
            for fragment in &fragments {
                let mark = if filter.is_substantive(fragment) { "+" } else { " " };
                log::info!("{} {}", mark, fragment.trim());
            }
            log::info!(
                "{} fragments, interesting: {}",
                fragments.len(),
                filter.is_interesting(&fragments)
            );
        }
    }

    Ok(())
}
