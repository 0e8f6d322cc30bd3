use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PipelineError;

const TTS_URL: &str = "https://translate.google.com/translate_tts";
const MAX_CHUNK_CHARS: usize = 100;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Text plus language code in, MP3 bytes out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Google Translate's public TTS endpoint. Only accepts short inputs, so
/// text is sent in chunks and the MP3 frames are concatenated.
pub struct GoogleTts {
    http: reqwest::Client,
}

impl GoogleTts {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_chunk(
        &self,
        chunk: &str,
        lang: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>, PipelineError> {
        let total = total.to_string();
        let idx = idx.to_string();
        let textlen = chunk.chars().count().to_string();
        let resp = self
            .http
            .get(TTS_URL)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", lang),
                ("q", chunk),
                ("total", total.as_str()),
                ("idx", idx.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Synthesis(format!(
                "chunk {}/{} returned {}",
                idx, total, status
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl Default for GoogleTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, PipelineError> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(PipelineError::Synthesis("nothing to speak".into()));
        }

        let mut audio = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            debug!("TTS chunk {}/{}: {} chars", i + 1, chunks.len(), chunk.len());
            audio.extend(self.fetch_chunk(chunk, lang, i, chunks.len()).await?);
        }
        Ok(audio)
    }
}

/// Split on whitespace into pieces of at most `max` chars. Words longer
/// than `max` are cut.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.push(word.drain(..max).collect());
        }
        if word.is_empty() {
            continue;
        }

        let extra = if current.is_empty() { word.len() } else { word.len() + 1 };
        if current_len + extra > max {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn audio_filename(index: usize) -> String {
    format!("welcome_message_{}.mp3", index)
}

/// Synthesize `text` and write it to `folder/filename`, creating the folder.
pub async fn create_audio_from_text<S: SpeechSynthesizer + ?Sized>(
    synth: &S,
    text: &str,
    lang: &str,
    folder: &Path,
    filename: &str,
) -> Result<PathBuf, PipelineError> {
    let audio = synth.synthesize(text, lang).await?;

    let write = |e: std::io::Error| PipelineError::Synthesis(format!("{:?}: {}", folder, e));
    tokio::fs::create_dir_all(folder).await.map_err(write)?;
    let path = folder.join(filename);
    tokio::fs::write(&path, audio).await.map_err(write)?;

    info!("Audio file saved as {:?}", path);
    Ok(path)
}
