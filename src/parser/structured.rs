use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::ExtractError;

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Pull the first embedded ld+json block out of a page and parse it.
pub fn structured_data(html: &str) -> Result<Value, ExtractError> {
    let document = Html::parse_document(html);
    let script = document
        .select(&LD_JSON)
        .next()
        .ok_or(ExtractError::MissingStructuredData)?;
    let raw: String = script.text().collect();
    Ok(serde_json::from_str(raw.trim())?)
}
