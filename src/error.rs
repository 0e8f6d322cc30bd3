use thiserror::Error;

/// Why a fetched page could not be turned into a profile record.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no application/ld+json block in page")]
    MissingStructuredData,
    #[error("structured-data block is not valid JSON: {0}")]
    MalformedStructuredData(#[from] serde_json::Error),
    #[error("structured-data block has no @graph array")]
    MissingGraph,
    #[error("no Person entity in @graph")]
    NoPerson,
    #[error("Person entity has no worksFor entries")]
    NoAffiliation,
}

/// A per-URL or per-profile fault, tagged with the pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("extraction failed for {url}: {source}")]
    Extraction {
        url: String,
        #[source]
        source: ExtractError,
    },
    #[error("could not persist {url}: {source}")]
    Persist {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("greeting generation failed: {0}")]
    Generation(String),
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Fetch { .. } => "fetch",
            PipelineError::Extraction { .. } => "extract",
            PipelineError::Persist { .. } => "persist",
            PipelineError::Generation(_) => "generate",
            PipelineError::Synthesis(_) => "synthesize",
        }
    }
}
