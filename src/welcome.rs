use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::warn;

use crate::audio::{self, SpeechSynthesizer};
use crate::error::PipelineError;
use crate::greeting::{self, TextGenerator};

pub struct GreetStats {
    pub errors: usize,
    pub files: Vec<PathBuf>,
}

/// Generate and voice a greeting for each profile, one at a time.
///
/// Audio files are numbered by the profile's 1-based position, so a failed
/// profile leaves a gap rather than shifting later files.
pub async fn greet_profiles<G, S>(
    generator: &G,
    synth: &S,
    profiles: &[&Value],
    audio_dir: &Path,
    lang: &str,
) -> anyhow::Result<GreetStats>
where
    G: TextGenerator + ?Sized,
    S: SpeechSynthesizer + ?Sized,
{
    let pb = ProgressBar::new(profiles.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    let mut stats = GreetStats {
        errors: 0,
        files: Vec::new(),
    };

    for (i, profile) in profiles.iter().enumerate() {
        let index = i + 1;
        let filename = audio::audio_filename(index);

        match greet_one(generator, synth, profile, audio_dir, &filename, lang).await {
            Ok(path) => stats.files.push(path),
            Err(e) => {
                stats.errors += 1;
                let name = profile.get("name").and_then(Value::as_str).unwrap_or("?");
                warn!(index, name, stage = e.stage(), "{}", e);
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}

async fn greet_one<G, S>(
    generator: &G,
    synth: &S,
    profile: &Value,
    audio_dir: &Path,
    filename: &str,
    lang: &str,
) -> Result<PathBuf, PipelineError>
where
    G: TextGenerator + ?Sized,
    S: SpeechSynthesizer + ?Sized,
{
    let message = greeting::generate_welcome_message(generator, profile).await?;
    audio::create_audio_from_text(synth, &message, lang, audio_dir, filename).await
}
