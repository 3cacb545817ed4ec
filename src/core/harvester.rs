use futures::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

use crate::core::follow::{FollowConfig, Frontier};
use crate::core::{Disposition, FetchFailure, FetchLoop, ScraperResult};
use crate::http::{FetchResponse, Target, TargetKind};
use crate::parser::{BusinessRecord, Extractor, LinkExtractor};
use crate::storage::{StorageCategory, StorageItem, StorageManager};

/// Totals for one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestSummary {
    /// Seed targets only; see `followed` for the rest.
    pub targets: usize,
    /// Follow-up targets: discovered links and listing profiles.
    pub followed: usize,
    pub fetched: usize,
    pub failed: usize,
    pub records: usize,
    pub extraction_errors: usize,
    /// Set when the run stopped before every target had an outcome.
    pub cancelled: bool,
}

/// Row written to the error sink for a target that could not be fetched.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub target: String,
    pub kind: TargetKind,
    pub disposition: Disposition,
    pub attempts: usize,
    pub error: String,
}

impl From<&FetchFailure> for FailureRecord {
    fn from(failure: &FetchFailure) -> Self {
        Self {
            target: failure.target.value().to_string(),
            kind: failure.target.kind(),
            disposition: failure.disposition,
            attempts: failure.attempts,
            error: failure.last_error.to_string(),
        }
    }
}

/// A record extracted from a listing page, waiting for its profile page.
struct HeldRecord {
    record: BusinessRecord,
    found_on: StorageContext,
}

/// Where a stored record came from.
#[derive(Clone)]
struct StorageContext {
    source: String,
    url: Url,
    metadata: serde_json::Value,
}

impl StorageContext {
    fn of(response: &FetchResponse) -> Self {
        Self {
            source: response.target.to_string(),
            url: public_url(response),
            metadata: serde_json::json!({
                "attempts": response.attempts,
                "status": response.status,
                "proxy": response.proxy,
            }),
        }
    }
}

/// Why a target is in a round.
enum Origin {
    /// A seed or discovered page, `depth` link hops from a seed.
    Page { depth: usize },
    Profile(Box<HeldRecord>),
}

/// Drains a [`FetchLoop`], extracts records from every response and writes
/// them to the data sink. Failed targets go to the error sink.
///
/// With following enabled the run goes in rounds: links and listing
/// profiles found in one round become the next round's targets, fetched
/// through clones of the same loop so they share its rate budgets.
pub struct Harvester {
    extractor: Arc<dyn Extractor>,
    storage: StorageManager,
    follow: FollowConfig,
    links: Option<LinkExtractor>,
}

/// The response URL without its query string, which may carry credentials.
fn public_url(response: &FetchResponse) -> Url {
    let mut url = response.url.clone();
    url.set_query(None);
    url
}

impl Harvester {
    pub fn new(extractor: Arc<dyn Extractor>, storage: StorageManager) -> Self {
        Self {
            extractor,
            storage,
            follow: FollowConfig::default(),
            links: None,
        }
    }

    pub fn with_follow(mut self, follow: FollowConfig) -> ScraperResult<Self> {
        self.links = if follow.max_depth > 0 {
            Some(LinkExtractor::new()?)
        } else {
            None
        };
        self.follow = follow;
        Ok(self)
    }

    /// Only storage errors end the run early; fetch and extraction problems
    /// are counted and logged.
    pub async fn run(&self, fetch_loop: FetchLoop, targets: Vec<Target>) -> ScraperResult<HarvestSummary> {
        let mut summary = HarvestSummary {
            targets: targets.len(),
            ..HarvestSummary::default()
        };
        let cancel = fetch_loop.cancellation_token();
        let mut frontier = Frontier::new(self.follow.clone(), &targets);
        let mut round: Vec<(Target, Origin)> = targets
            .into_iter()
            .map(|target| (target, Origin::Page { depth: 0 }))
            .collect();

        let mut number = 1;
        while !round.is_empty() {
            if number > 1 {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    let held = round.into_iter().map(|(_, origin)| origin);
                    self.store_unfollowed(held, &mut summary).await?;
                    break;
                }
                info!("Follow-up round {}: {} target(s)", number, round.len());
            }

            let (targets, origins): (Vec<Target>, Vec<Origin>) = round.into_iter().unzip();
            let next = self
                .run_round(fetch_loop.clone(), targets, origins, &mut frontier, &mut summary)
                .await?;
            summary.followed += next.len();
            round = next;
            number += 1;
        }
        self.storage.flush_all().await?;

        info!(
            "Harvest finished: {} fetched, {} failed, {} record(s), {} follow-up(s){}",
            summary.fetched,
            summary.failed,
            summary.records,
            summary.followed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    async fn run_round(
        &self,
        fetch_loop: FetchLoop,
        targets: Vec<Target>,
        origins: Vec<Origin>,
        frontier: &mut Frontier,
        summary: &mut HarvestSummary,
    ) -> ScraperResult<Vec<(Target, Origin)>> {
        let expected = targets.len();
        let mut origins: Vec<Option<Origin>> = origins.into_iter().map(Some).collect();
        let mut next = Vec::new();

        let outcomes = fetch_loop.run(targets);
        futures::pin_mut!(outcomes);

        let mut seen = 0;
        while let Some(outcome) = outcomes.next().await {
            seen += 1;
            let Some(origin) = origins.get_mut(outcome.index).and_then(Option::take) else {
                warn!("Outcome for unknown index {}", outcome.index);
                continue;
            };
            match outcome.result {
                Ok(response) => {
                    summary.fetched += 1;
                    match origin {
                        Origin::Page { depth } => {
                            self.harvest_page(&response, depth, frontier, summary, &mut next)
                                .await?;
                        }
                        Origin::Profile(held) => {
                            self.complete_from_profile(*held, &response, summary).await?;
                        }
                    }
                }
                Err(failure) => {
                    summary.failed += 1;
                    warn!("Giving up on {}", failure);
                    let item = StorageItem::new(
                        failure.target.to_string(),
                        None,
                        FailureRecord::from(&failure),
                    );
                    self.storage.store(StorageCategory::Error, item).await?;
                    if let Origin::Profile(held) = origin {
                        self.store_record(held.record, &held.found_on).await?;
                        summary.records += 1;
                    }
                }
            }
        }

        if seen < expected {
            summary.cancelled = true;
            // Records whose profile was never fetched are kept as extracted.
            self.store_unfollowed(origins.into_iter().flatten(), summary).await?;
            self.store_unfollowed(next.drain(..).map(|(_, origin)| origin), summary)
                .await?;
        }
        Ok(next)
    }

    async fn harvest_page(
        &self,
        response: &FetchResponse,
        depth: usize,
        frontier: &mut Frontier,
        summary: &mut HarvestSummary,
        next: &mut Vec<(Target, Origin)>,
    ) -> ScraperResult<()> {
        let context = StorageContext::of(response);
        for record in self.extract_records(response, summary).await {
            let profile = record
                .extra
                .get("profile_url")
                .filter(|_| frontier.config().profiles && record.phone.is_none())
                .and_then(|url| frontier.admit_profile(url));
            match profile {
                Some(target) => next.push((
                    target,
                    Origin::Profile(Box::new(HeldRecord {
                        record,
                        found_on: context.clone(),
                    })),
                )),
                None => {
                    self.store_record(record, &context).await?;
                    summary.records += 1;
                }
            }
        }

        if let Some(links) = &self.links {
            for link in links.links(response) {
                if let Some(target) = frontier.admit_link(&link, &response.url, depth) {
                    next.push((target, Origin::Page { depth: depth + 1 }));
                }
            }
        }
        Ok(())
    }

    async fn complete_from_profile(
        &self,
        held: HeldRecord,
        response: &FetchResponse,
        summary: &mut HarvestSummary,
    ) -> ScraperResult<()> {
        let mut record = held.record;
        match self.extractor.extract_detail(response).await {
            Ok(Some(detail)) => record.fill_missing(&detail),
            Ok(None) => debug!("Profile {} added nothing to {:?}", response.target, record.name),
            Err(e) => {
                summary.extraction_errors += 1;
                warn!("Profile extraction failed on {}: {}", response.target, e);
            }
        }
        self.store_record(record, &held.found_on).await?;
        summary.records += 1;
        Ok(())
    }

    async fn store_unfollowed(
        &self,
        origins: impl Iterator<Item = Origin>,
        summary: &mut HarvestSummary,
    ) -> ScraperResult<()> {
        for origin in origins {
            if let Origin::Profile(held) = origin {
                self.store_record(held.record, &held.found_on).await?;
                summary.records += 1;
            }
        }
        Ok(())
    }

    async fn extract_records(
        &self,
        response: &FetchResponse,
        summary: &mut HarvestSummary,
    ) -> Vec<BusinessRecord> {
        match self.extractor.extract(response).await {
            Ok(records) => records,
            Err(e) => {
                summary.extraction_errors += 1;
                warn!(
                    "{} extractor failed on {}: {}",
                    self.extractor.name(),
                    response.target,
                    e
                );
                Vec::new()
            }
        }
    }

    async fn store_record(&self, record: BusinessRecord, context: &StorageContext) -> ScraperResult<()> {
        let item = StorageItem::new(context.source.clone(), Some(context.url.clone()), record)
            .with_metadata(context.metadata.clone());
        self.storage.store(StorageCategory::Data, item).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::RetryConfig;
    use crate::core::{FetchErrorKind, FetchLoopConfig};
    use crate::parser::{ListingExtractor, ListingSelectors};
    use crate::rate_limit::RatePolicy;
    use crate::scrapers::mock_scraper::{MockReply, MockScraper};
    use crate::storage::{create_storage, StorageType};
    use async_trait::async_trait;
    use std::time::Duration;

    /// One record per response, named after the body; "broken" bodies fail.
    struct BodyExtractor;

    #[async_trait]
    impl Extractor for BodyExtractor {
        fn name(&self) -> &str {
            "body"
        }

        async fn extract(&self, response: &FetchResponse) -> ScraperResult<Vec<BusinessRecord>> {
            if response.decoded_body == "broken" {
                return Err(crate::core::ScraperError::ExtractionError("bad page".into()));
            }
            Ok(vec![BusinessRecord::named(response.decoded_body.clone())])
        }
    }

    fn loop_config() -> FetchLoopConfig {
        FetchLoopConfig {
            rate_policy: RatePolicy::MinInterval(Duration::from_millis(100)),
            retry: RetryConfig::default()
                .with_max_attempts(2)
                .with_delays(Duration::from_millis(10), Duration::from_millis(10))
                .with_jitter(0.0),
            ..FetchLoopConfig::default()
        }
    }

    fn fetch_loop(mock: MockScraper) -> FetchLoop {
        FetchLoop::new(Arc::new(mock), loop_config(), None).unwrap()
    }

    fn storage(dir: &std::path::Path) -> StorageManager {
        let csv = |path: &std::path::Path| {
            create_storage(StorageType::Csv {
                path: path.to_path_buf(),
            })
            .unwrap()
        };
        StorageManager::new()
            .register_storage(StorageCategory::Data, csv(dir), "records")
            .register_storage(StorageCategory::Error, csv(dir), "errors")
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_and_failures_reach_their_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockScraper::new()
            .script("https://a.mk/", vec![MockReply::ok("Spa A")])
            .script(
                "https://b.mk/",
                vec![MockReply::Fail(FetchErrorKind::NotFound(404))],
            )
            .script("https://c.mk/", vec![MockReply::ok("broken")])
            .script("https://d.mk/", vec![MockReply::ok("Spa D")]);
        let targets = ["https://a.mk/", "https://b.mk/", "https://c.mk/", "https://d.mk/"]
            .into_iter()
            .map(Target::url)
            .collect();

        let harvester = Harvester::new(Arc::new(BodyExtractor), storage(dir.path()));
        let summary = harvester.run(fetch_loop(mock), targets).await.unwrap();

        assert_eq!(
            summary,
            HarvestSummary {
                targets: 4,
                followed: 0,
                fetched: 3,
                failed: 1,
                records: 2,
                extraction_errors: 1,
                cancelled: false,
            }
        );

        let records = std::fs::read_to_string(dir.path().join("records.csv")).unwrap();
        let names: Vec<&str> = records
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["Spa A", "Spa D"]);

        let errors = std::fs::read_to_string(dir.path().join("errors.csv")).unwrap();
        let mut lines = errors.lines();
        assert_eq!(lines.next(), Some("target,kind,disposition,attempts,error"));
        assert_eq!(
            lines.next(),
            Some("https://b.mk/,url,Permanent,1,not found (HTTP 404)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovered_links_are_followed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(
            MockScraper::new()
                .script(
                    "https://guide.mk/wellness/a",
                    vec![MockReply::ok(
                        r#"<html><a href="/wellness/b">b</a><a href="/hotels/x">x</a><a href="/wellness/a#top">self</a></html>"#,
                    )],
                )
                .script(
                    "https://guide.mk/wellness/b",
                    vec![MockReply::ok(
                        r#"<html><a href="/wellness/a">a</a><a href="/wellness/c">c</a></html>"#,
                    )],
                )
                .script(
                    "https://guide.mk/wellness/c",
                    vec![MockReply::ok(r#"<html><a href="/wellness/d">d</a></html>"#)],
                ),
        );
        let fetch_loop = FetchLoop::new(
            Arc::clone(&mock) as Arc<dyn crate::scrapers::Scraper>,
            loop_config(),
            None,
        )
        .unwrap();

        let harvester = Harvester::new(Arc::new(BodyExtractor), storage(dir.path()))
            .with_follow(FollowConfig {
                max_depth: 2,
                link_patterns: vec!["wellness".to_string()],
                ..FollowConfig::default()
            })
            .unwrap();
        let summary = harvester
            .run(fetch_loop, vec![Target::url("https://guide.mk/wellness/a")])
            .await
            .unwrap();

        assert_eq!(
            mock.dispatched_targets(),
            vec![
                "https://guide.mk/wellness/a",
                "https://guide.mk/wellness/b",
                "https://guide.mk/wellness/c",
            ]
        );
        assert_eq!(summary.targets, 1);
        assert_eq!(summary.followed, 2);
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.records, 3);
        assert!(!summary.cancelled);
    }

    const ZK_LISTING: &str = r#"<html><body>
        <div class="result">
          <h2 class="fontot"><a class="companyname" href="/en/petrov">Dr Petrov</a></h2>
        </div>
        <div class="result">
          <h2 class="fontot"><a class="companyname" href="/en/smile">Smile Dent</a></h2>
          <span itemprop="telephone">034 222 222</span>
        </div>
    </body></html>"#;

    fn listing_harvester(dir: &std::path::Path) -> Harvester {
        let extractor = ListingExtractor::new(ListingSelectors::default()).unwrap();
        Harvester::new(Arc::new(extractor), storage(dir))
            .with_follow(FollowConfig {
                profiles: true,
                ..FollowConfig::default()
            })
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_pages_fill_listing_records() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockScraper::new()
            .script("https://zk.mk/dentists/gevgelija", vec![MockReply::ok(ZK_LISTING)])
            .script(
                "https://zk.mk/en/petrov",
                vec![MockReply::ok(
                    r#"<html><span itemprop="telephone">034&nbsp;211&nbsp;111</span></html>"#,
                )],
            );

        let summary = listing_harvester(dir.path())
            .run(
                fetch_loop(mock),
                vec![Target::url("https://zk.mk/dentists/gevgelija")],
            )
            .await
            .unwrap();
        assert_eq!(summary.followed, 1);
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.records, 2);

        let records = std::fs::read_to_string(dir.path().join("records.csv")).unwrap();
        let lines: Vec<&str> = records.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("Smile Dent,,,034 222 222,"), "{}", lines[1]);
        assert!(lines[2].starts_with("Dr Petrov,,,034 211 111,"), "{}", lines[2]);
        assert!(
            lines[2].contains(",https://zk.mk/dentists/gevgelija,"),
            "{}",
            lines[2]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_profile_keeps_the_listing_record() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockScraper::new()
            .script("https://zk.mk/dentists/gevgelija", vec![MockReply::ok(ZK_LISTING)])
            .script(
                "https://zk.mk/en/petrov",
                vec![MockReply::Fail(FetchErrorKind::NotFound(404))],
            );

        let summary = listing_harvester(dir.path())
            .run(
                fetch_loop(mock),
                vec![Target::url("https://zk.mk/dentists/gevgelija")],
            )
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.records, 2);

        let records = std::fs::read_to_string(dir.path().join("records.csv")).unwrap();
        assert!(records.lines().any(|l| l.starts_with("Dr Petrov,,,,")));
        let errors = std::fs::read_to_string(dir.path().join("errors.csv")).unwrap();
        assert!(errors.contains("https://zk.mk/en/petrov,url,Permanent,1,"));
    }

    #[tokio::test]
    async fn test_error_sink_never_contains_api_key() {
        use crate::scrapers::GooglePlacesScraper;

        let dir = tempfile::tempdir().unwrap();
        let scraper = GooglePlacesScraper::new("SECRETKEY123")
            .unwrap()
            .with_base_url("http://127.0.0.1:1/maps/api/place/")
            .unwrap();
        let config = FetchLoopConfig {
            retry: RetryConfig::default().with_max_attempts(1),
            ..FetchLoopConfig::default()
        };
        let fetch_loop = FetchLoop::new(Arc::new(scraper), config, None).unwrap();

        let harvester = Harvester::new(Arc::new(BodyExtractor), storage(dir.path()));
        let summary = harvester
            .run(fetch_loop, vec![Target::query("spa in Ohrid, Macedonia")])
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);

        let errors = std::fs::read_to_string(dir.path().join("errors.csv")).unwrap();
        assert!(errors.contains("connection error"), "{}", errors);
        assert!(!errors.contains("SECRETKEY123"), "{}", errors);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let fetch_loop = fetch_loop(MockScraper::new());
        fetch_loop.cancellation_token().cancel();

        let harvester = Harvester::new(Arc::new(BodyExtractor), storage(dir.path()));
        let summary = harvester
            .run(fetch_loop, vec![Target::url("https://a.mk/")])
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.fetched, 0);
    }
}
