use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::PipelineError;
use crate::ledger::Ledger;
use crate::parser::{self, ProfileRecord};
use crate::store;

/// A page as returned by the fetch facility.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The facility's own record of what it fetched. May wrap the target
    /// URL in an encoded `url=` query parameter.
    pub request_url: String,
    pub html: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, PipelineError>;
}

/// spider.cloud client configured for profile pages.
pub struct SpiderFetcher {
    spider: Spider,
    country: String,
    accept_language: String,
}

impl SpiderFetcher {
    pub fn new(api_key: String, country: &str, accept_language: &str) -> Result<Self> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow::anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self {
            spider,
            country: country.to_string(),
            accept_language: accept_language.to_string(),
        })
    }

    fn params(&self) -> RequestParams {
        let headers = HashMap::from([(
            "Accept-Language".to_string(),
            self.accept_language.clone(),
        )]);
        RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            stealth: Some(true),
            country_code: Some(self.country.clone()),
            headers: Some(headers),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PageFetcher for SpiderFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, PipelineError> {
        let fault = |reason: String| PipelineError::Fetch {
            url: url.to_string(),
            reason,
        };

        let value = self
            .spider
            .scrape_url(url, Some(self.params()), "application/json")
            .await
            .map_err(|e| fault(e.to_string()))?;

        let parsed: serde_json::Value = match value.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
            None => value,
        };
        let first = parsed
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| fault("empty response".into()))?;

        if let Some(err) = first.get("error").and_then(|e| e.as_str()) {
            return Err(fault(err.to_string()));
        }
        if let Some(status) = first.get("status").and_then(|s| s.as_i64()) {
            if !(200..300).contains(&status) {
                return Err(fault(format!("status {}", status)));
            }
        }

        let html = first
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| fault("no content in response".into()))?
            .to_string();
        // spider.cloud takes the target directly; the page `url` it reports
        // back can be a post-redirect address, so keep what was requested.
        if let Some(landed) = first.get("url").and_then(|u| u.as_str()) {
            if landed != url {
                debug!("{} landed on {}", url, landed);
            }
        }

        Ok(FetchedPage {
            request_url: url.to_string(),
            html,
        })
    }
}

/// Recover the target URL from a facility request URL.
///
/// Proxy-style APIs put the target in a percent-encoded `url=` parameter;
/// that value wins when it is itself an absolute http(s) URL. Anything else
/// is taken to be the target already.
pub fn decode_source_url(raw: &str) -> String {
    let raw = raw.trim();
    let embedded = Url::parse(raw).ok().and_then(|parsed| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == "url")
            .map(|(_, v)| v.into_owned())
    });

    match embedded {
        Some(target) if Url::parse(&target).is_ok_and(|t| t.scheme().starts_with("http")) => {
            target
        }
        _ => raw.to_string(),
    }
}

/// Split input into (to fetch, skipped), both in input order.
/// Already-recorded URLs and repeats within the input are skipped.
pub fn partition(urls: &[String], seen: &HashSet<String>) -> (Vec<String>, Vec<String>) {
    let mut queued = HashSet::new();
    let mut to_fetch = Vec::new();
    let mut skipped = Vec::new();

    for url in urls {
        if seen.contains(url) || !queued.insert(url.as_str()) {
            skipped.push(url.clone());
        } else {
            to_fetch.push(url.clone());
        }
    }
    (to_fetch, skipped)
}

/// Scrape stats returned after completion.
pub struct ScrapeStats {
    pub total: usize,
    pub skipped: usize,
    pub failed: usize,
    /// New profiles in completion order.
    pub profiles: Vec<ProfileRecord>,
}

/// Fetch every URL not yet in the ledger, concurrently, and handle each
/// response as it arrives: extract, write JSON, then record in the ledger.
///
/// A fault on one URL is logged and counted; that URL is not recorded and
/// the batch carries on.
pub async fn scrape_profiles<F>(
    fetcher: Arc<F>,
    urls: &[String],
    ledger: &Ledger,
    profile_dir: &Path,
    concurrency: usize,
) -> Result<ScrapeStats>
where
    F: PageFetcher + 'static,
{
    let seen = ledger.load()?;
    let (to_fetch, skipped) = partition(urls, &seen);
    for url in &skipped {
        info!("Skipping already scraped link: {}", url);
    }

    let total = to_fetch.len();
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Channel: workers send pages, main loop handles them in completion order
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(String, Result<FetchedPage, PipelineError>)>(concurrency * 2);

    let mut tasks = Vec::with_capacity(total);
    for url in to_fetch {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let task_url = url.clone();

        let handle = tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = fetcher.fetch(&task_url).await;
            let _ = tx.send((task_url, result)).await;
        });
        tasks.push((url, handle));
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut profiles = Vec::new();
    let mut failed = 0usize;

    while let Some((submitted, result)) = rx.recv().await {
        let outcome =
            result.and_then(|page| handle_page(&page, &submitted, ledger, profile_dir));
        match outcome {
            Ok(record) => profiles.push(record),
            Err(e) => {
                failed += 1;
                warn!(url = %submitted, stage = e.stage(), "{}", e);
            }
        }
        pb.inc(1);
    }

    // A task that panicked never sent a result
    for (url, handle) in tasks {
        if let Err(e) = handle.await {
            failed += 1;
            warn!(url = %url, stage = "fetch", "fetch task aborted: {}", e);
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    info!(
        "Scraped {} pages ({} new profiles, {} failed, {} skipped)",
        total,
        profiles.len(),
        failed,
        skipped.len()
    );

    Ok(ScrapeStats {
        total,
        skipped: skipped.len(),
        failed,
        profiles,
    })
}

/// Extract, persist, then mark the source URL as done.
///
/// The ledger is keyed on the submitted input URL, since that is what
/// `partition` checks on the next run. The facility's request URL is
/// decoded only to report a mismatch.
fn handle_page(
    page: &FetchedPage,
    submitted: &str,
    ledger: &Ledger,
    profile_dir: &Path,
) -> Result<ProfileRecord, PipelineError> {
    let decoded = decode_source_url(&page.request_url);
    if decoded != submitted {
        warn!("Facility reported {} for {}; keeping the submitted URL", decoded, submitted);
    }
    let url = submitted.to_string();

    let record = parser::parse_profile(&page.html).map_err(|source| PipelineError::Extraction {
        url: url.clone(),
        source,
    })?;

    let persist = |source: anyhow::Error| PipelineError::Persist {
        url: url.clone(),
        source,
    };
    let path = store::write_profile(profile_dir, &url, &record).map_err(persist)?;
    info!("Saved profile data to {:?}", path);
    ledger.record(&url).map_err(persist)?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeFetcher {
        pages: HashMap<String, String>,
        delays_ms: HashMap<String, u64>,
        host_rewrite: Option<(&'static str, &'static str)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(pages: &[(&str, String)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(u, h)| (u.to_string(), h.clone()))
                    .collect(),
                delays_ms: HashMap::new(),
                host_rewrite: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, url: &str, ms: u64) -> Self {
            self.delays_ms.insert(url.to_string(), ms);
            self
        }

        /// Report a different URL back than the one requested, like a redirect.
        fn reporting_rewrite(mut self, from: &'static str, to: &'static str) -> Self {
            self.host_rewrite = Some((from, to));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, PipelineError> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.ends_with("/crash") {
                panic!("fetcher blew up on {}", url);
            }
            if let Some(ms) = self.delays_ms.get(url) {
                tokio::time::sleep(std::time::Duration::from_millis(*ms)).await;
            }
            let html = self.pages.get(url).cloned().ok_or_else(|| PipelineError::Fetch {
                url: url.to_string(),
                reason: "status 404".into(),
            })?;
            let reported = match self.host_rewrite {
                Some((from, to)) => url.replace(from, to),
                None => url.to_string(),
            };
            let encoded: String =
                url::form_urlencoded::byte_serialize(reported.as_bytes()).collect();
            Ok(FetchedPage {
                request_url: format!("https://api.scrape.test/scrape?key=k&url={}", encoded),
                html,
            })
        }
    }

    fn page(name: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@graph": [
                {{"@type": "Person", "name": "{}", "worksFor": [{{"name": "Acme"}}, {{"name": "Other"}}]}},
                {{"@type": "Article", "articleBody": "<p>Hi</p><span>x</span><p>there</p>"}}
            ]}}
            </script></head><body></body></html>"#,
            name
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn decodes_embedded_target() {
        let raw = "https://api.scrape.test/scrape?key=k&url=https%3A%2F%2Fexample.com%2Fin%2Fjane-doe%2F";
        assert_eq!(decode_source_url(raw), "https://example.com/in/jane-doe/");
    }

    #[test]
    fn plain_url_passes_through() {
        assert_eq!(
            decode_source_url(" https://example.com/in/jane-doe "),
            "https://example.com/in/jane-doe"
        );
        assert_eq!(
            decode_source_url("https://example.com/in/x?url=not-a-link"),
            "https://example.com/in/x?url=not-a-link"
        );
    }

    #[test]
    fn partition_keeps_order_and_drops_repeats() {
        let seen: HashSet<String> = ["https://x/a".to_string()].into();
        let input = urls(&["https://x/b", "https://x/a", "https://x/c", "https://x/b"]);
        let (fetch, skip) = partition(&input, &seen);
        assert_eq!(fetch, urls(&["https://x/b", "https://x/c"]));
        assert_eq!(skip, urls(&["https://x/a", "https://x/b"]));
    }

    #[tokio::test]
    async fn fetches_only_unrecorded_links() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("profiles");
        let ledger = Ledger::new(dir.path().join("links.txt"));
        ledger.record("https://example.com/in/a/").unwrap();

        let fetcher = Arc::new(FakeFetcher::new(&[
            ("https://example.com/in/a/", page("A")),
            ("https://example.com/in/b/", page("B")),
        ]));
        let input = urls(&["https://example.com/in/a/", "https://example.com/in/b/"]);

        let stats = scrape_profiles(Arc::clone(&fetcher), &input, &ledger, &out, 4)
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), urls(&["https://example.com/in/b/"]));
        assert_eq!(stats.total, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.profiles.len(), 1);
        assert_eq!(stats.profiles[0].profile["name"], "B");
        assert_eq!(stats.profiles[0].profile["worksFor"].as_array().unwrap().len(), 1);
        assert_eq!(stats.profiles[0].posts[0]["articleBody"], "Hithere");

        assert_eq!(store::count_files(&out, "json").unwrap(), 1);
        assert!(out.join("b.json").exists());

        let recorded = ledger.load().unwrap();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.contains("https://example.com/in/a/"));
        assert!(recorded.contains("https://example.com/in/b/"));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("profiles");
        let ledger = Ledger::new(dir.path().join("links.txt"));
        let fetcher = Arc::new(FakeFetcher::new(&[
            ("https://example.com/in/a", page("A")),
            ("https://example.com/in/b", page("B")),
        ]));
        let input = urls(&["https://example.com/in/a", "https://example.com/in/b"]);

        let first = scrape_profiles(Arc::clone(&fetcher), &input, &ledger, &out, 2)
            .await
            .unwrap();
        assert_eq!(first.profiles.len(), 2);

        let second = scrape_profiles(Arc::clone(&fetcher), &input, &ledger, &out, 2)
            .await
            .unwrap();
        assert_eq!(second.total, 0);
        assert_eq!(second.skipped, 2);
        assert!(second.profiles.is_empty());
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn faulty_pages_are_skipped_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("profiles");
        let ledger = Ledger::new(dir.path().join("links.txt"));
        let no_person = r#"<script type="application/ld+json">{"@graph": [{"@type": "WebPage"}]}</script>"#;
        let fetcher = Arc::new(FakeFetcher::new(&[
            ("https://example.com/in/good", page("Good")),
            ("https://example.com/in/empty", no_person.to_string()),
            ("https://example.com/in/bare", "<html></html>".to_string()),
        ]));
        let input = urls(&[
            "https://example.com/in/empty",
            "https://example.com/in/missing",
            "https://example.com/in/good",
            "https://example.com/in/bare",
        ]);

        let stats = scrape_profiles(fetcher, &input, &ledger, &out, 1).await.unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.profiles.len(), 1);
        let recorded = ledger.load().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded.contains("https://example.com/in/good"));
        assert_eq!(store::count_files(&out, "json").unwrap(), 1);
    }

    #[tokio::test]
    async fn reported_url_does_not_change_ledger_key() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("profiles");
        let ledger = Ledger::new(dir.path().join("links.txt"));
        let fetcher = Arc::new(
            FakeFetcher::new(&[("https://www.example.com/in/jane/", page("Jane"))])
                .reporting_rewrite("://www.", "://uk."),
        );
        let input = urls(&["https://www.example.com/in/jane/"]);

        let first = scrape_profiles(Arc::clone(&fetcher), &input, &ledger, &out, 2)
            .await
            .unwrap();
        assert_eq!(first.profiles.len(), 1);

        let second = scrape_profiles(Arc::clone(&fetcher), &input, &ledger, &out, 2)
            .await
            .unwrap();
        assert_eq!(second.total, 0);
        assert_eq!(fetcher.calls().len(), 1);

        let recorded = ledger.load().unwrap();
        let expected: HashSet<String> = ["https://www.example.com/in/jane/".to_string()].into();
        assert_eq!(recorded, expected);
        assert!(out.join("jane.json").exists());
    }

    #[tokio::test]
    async fn profiles_come_back_in_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("profiles");
        let ledger = Ledger::new(dir.path().join("links.txt"));
        let fetcher = Arc::new(
            FakeFetcher::new(&[
                ("https://example.com/in/slow", page("Slow")),
                ("https://example.com/in/fast", page("Fast")),
            ])
            .with_delay("https://example.com/in/slow", 200),
        );
        let input = urls(&["https://example.com/in/slow", "https://example.com/in/fast"]);

        let stats = scrape_profiles(fetcher, &input, &ledger, &out, 2).await.unwrap();

        let names: Vec<&str> = stats
            .profiles
            .iter()
            .map(|p| p.profile["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Fast", "Slow"]);
    }

    #[tokio::test]
    async fn crashed_fetch_task_counts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("profiles");
        let ledger = Ledger::new(dir.path().join("links.txt"));
        let fetcher = Arc::new(FakeFetcher::new(&[("https://example.com/in/ok", page("Ok"))]));
        let input = urls(&["https://example.com/in/crash", "https://example.com/in/ok"]);

        let stats = scrape_profiles(fetcher, &input, &ledger, &out, 2).await.unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.profiles.len(), 1);
        assert_eq!(stats.total, stats.failed + stats.profiles.len());
        assert!(!ledger.load().unwrap().contains("https://example.com/in/crash"));
    }

    #[test]
    fn spider_params_pin_fetch_configuration() {
        let fetcher = SpiderFetcher::new("test-key".into(), "US", "en-US,en;q=0.5").unwrap();
        let params = fetcher.params();

        assert_eq!(params.stealth, Some(true));
        assert_eq!(params.country_code.as_deref(), Some("US"));
        let language = params
            .headers
            .as_ref()
            .and_then(|h| h.get("Accept-Language"))
            .map(String::as_str);
        assert_eq!(language, Some("en-US,en;q=0.5"));
    }
}
