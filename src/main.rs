mod audio;
mod error;
mod fetch;
mod greeting;
mod input;
mod ledger;
mod parser;
mod settings;
mod store;
mod welcome;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::audio::GoogleTts;
use crate::fetch::SpiderFetcher;
use crate::greeting::GroqClient;
use crate::ledger::Ledger;
use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "profile_greeter",
    about = "Scrape profile pages and voice a personalized welcome for each new one"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape new profiles, then generate a welcome audio for each (default)
    Run,
    /// Scrape new profiles only
    Scrape,
    /// Generate welcome audio for every profile JSON already on disk
    Greet,
    /// Show ledger and output counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    tracing::debug!(?settings, "Configuration loaded");

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let t_scrape = Instant::now();
            let profiles = scrape(&settings).await?;
            println!("Scrape phase took {:.1}s", t_scrape.elapsed().as_secs_f64());
            if profiles.is_empty() {
                println!("No new profiles to greet.");
                return Ok(());
            }
            let refs: Vec<&Value> = profiles.iter().collect();
            greet(&settings, &refs).await
        }
        Commands::Scrape => scrape(&settings).await.map(|_| ()),
        Commands::Greet => {
            let saved = store::read_profiles(&settings.profile_dir)?;
            if saved.is_empty() {
                println!(
                    "No profile JSON files in {:?}. Run 'scrape' first.",
                    settings.profile_dir
                );
                return Ok(());
            }
            let refs: Vec<&Value> = saved.iter().map(|(_, r)| &r.profile).collect();
            greet(&settings, &refs).await
        }
        Commands::Stats => {
            let ledger = Ledger::new(&settings.ledger_path);
            let seen = ledger.load()?;
            let links = input::read_profile_links(&settings.input_path, &settings.input_column);
            let pending = match links {
                Ok(urls) => {
                    let (to_fetch, _) = fetch::partition(&urls, &seen);
                    println!("Input:     {}", urls.len());
                    Some(to_fetch.len())
                }
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    None
                }
            };
            println!("Scraped:   {} ({:?})", seen.len(), ledger.path());
            if let Some(n) = pending {
                println!("Pending:   {}", n);
            }
            println!("Profiles:  {}", store::count_files(&settings.profile_dir, "json")?);
            println!("Audio:     {}", store::count_files(&settings.audio_dir, "mp3")?);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Run the batch orchestrator over the configured input list.
async fn scrape(settings: &Settings) -> Result<Vec<Value>> {
    let urls = input::read_profile_links(&settings.input_path, &settings.input_column)?;
    let ledger = Ledger::new(&settings.ledger_path);
    let fetcher = Arc::new(SpiderFetcher::new(
        settings::api_key("SPIDER_API_KEY")?,
        &settings.country,
        &settings.accept_language,
    )?);

    println!("Loaded {} profile links from {:?}", urls.len(), settings.input_path);
    let stats = fetch::scrape_profiles(
        fetcher,
        &urls,
        &ledger,
        &settings.profile_dir,
        settings.concurrency,
    )
    .await?;

    println!(
        "Scraped and saved {} new profiles ({} fetched, {} failed, {} skipped).",
        stats.profiles.len(),
        stats.total,
        stats.failed,
        stats.skipped
    );
    Ok(stats.profiles.into_iter().map(|r| r.profile).collect())
}

async fn greet(settings: &Settings, profiles: &[&Value]) -> Result<()> {
    let generator = GroqClient::new(settings::api_key("GROQ_API_KEY")?, &settings.model);
    let tts = GoogleTts::new();

    println!("Generating {} welcome messages...", profiles.len());
    let stats = welcome::greet_profiles(
        &generator,
        &tts,
        profiles,
        &settings.audio_dir,
        &settings.language,
    )
    .await?;
    println!(
        "Saved {} audio files to {:?} ({} errors).",
        stats.files.len(),
        settings.audio_dir,
        stats.errors
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
