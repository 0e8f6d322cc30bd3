use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtractError;

static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());

const PERSON: &str = "Person";
const ARTICLE: &str = "Article";
const AFFILIATION: &str = "worksFor";
const BODY: &str = "articleBody";

/// One scraped profile: the Person entity plus the Article entities on its page.
/// Entity attributes are kept as open JSON objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub profile: Value,
    pub posts: Vec<Value>,
}

/// Reduce a parsed ld+json document to a `ProfileRecord`.
///
/// The first `Person` in `@graph` becomes the profile, with `worksFor` cut
/// down to its first entry. Every `Article` becomes a post whose
/// `articleBody` is replaced by the concatenated paragraph text.
pub fn refine_profile(data: &Value) -> Result<ProfileRecord, ExtractError> {
    let graph = data
        .get("@graph")
        .and_then(Value::as_array)
        .ok_or(ExtractError::MissingGraph)?;

    let mut profile = graph
        .iter()
        .find(|e| has_type(e, PERSON))
        .cloned()
        .ok_or(ExtractError::NoPerson)?;
    keep_first_affiliation(&mut profile)?;

    let posts = graph
        .iter()
        .filter(|e| has_type(e, ARTICLE))
        .cloned()
        .map(|mut article| {
            if let Some(body) = article.get(BODY).and_then(Value::as_str) {
                let text = paragraph_text(body);
                article[BODY] = Value::String(text);
            }
            article
        })
        .collect();

    Ok(ProfileRecord { profile, posts })
}

fn has_type(entity: &Value, kind: &str) -> bool {
    entity.get("@type").and_then(Value::as_str) == Some(kind)
}

fn keep_first_affiliation(profile: &mut Value) -> Result<(), ExtractError> {
    let first = profile
        .get(AFFILIATION)
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .cloned()
        .ok_or(ExtractError::NoAffiliation)?;
    profile[AFFILIATION] = Value::Array(vec![first]);
    Ok(())
}

/// Text directly inside each `<p>` of an HTML fragment, joined in document order.
/// Anything outside paragraphs, and markup nested inside them, is dropped.
pub fn paragraph_text(fragment: &str) -> String {
    let html = Html::parse_fragment(fragment);
    let mut out = String::new();
    for p in html.select(&PARAGRAPH) {
        for child in p.children() {
            if let Some(text) = child.value().as_text() {
                out.push_str(text);
            }
        }
    }
    out
}
