use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use listing_harvester::core::ConfigError;
use listing_harvester::http::Target;
use listing_harvester::llm::OpenAiEnricher;
use listing_harvester::parser::{
    EnrichingExtractor, Extractor, FacebookExtractor, GooglePlacesExtractor, HunterExtractor,
    ListingExtractor, ListingSelectors, PageExtractor,
};
use listing_harvester::presets::{self, build_queries, DEFAULT_COUNTRY};
use listing_harvester::proxy::{ProxyEndpoint, ProxyPool};
use listing_harvester::rate_limit::{RateKeying, RatePolicy};
use listing_harvester::scrapers::{
    FacebookScraper, GooglePlacesScraper, HttpScraper, HunterScraper, Scraper,
};
use listing_harvester::storage::{
    create_storage, OutputFormat, StorageCategory, StorageManager, StorageType,
};
use listing_harvester::{FetchLoop, FollowConfig, HarvestConfig, Harvester};

#[derive(Parser)]
#[command(name = "listing-harvester", version, about = "Polite scraper for business listings")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Output directory
    #[arg(long, global = true, env = "HARVEST_OUTPUT_DIR")]
    output: Option<PathBuf>,

    #[arg(long, global = true, default_value = "csv")]
    format: OutputFormat,

    /// Minimum milliseconds between requests sharing a rate key
    #[arg(long, global = true)]
    min_interval_ms: Option<u64>,

    #[arg(long, global = true)]
    max_attempts: Option<usize>,

    /// global, proxy or host
    #[arg(long, global = true)]
    rate_key: Option<RateKeying>,

    /// Proxy URL; repeat for a pool
    #[arg(long = "proxy", global = true)]
    proxies: Vec<String>,

    #[arg(long, global = true)]
    require_proxy: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Search keyword; defaults to the wellness presets
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// City to search in; defaults to all preset cities
    #[arg(long = "city")]
    cities: Vec<String>,

    #[arg(long, default_value = DEFAULT_COUNTRY)]
    country: String,
}

impl QueryArgs {
    fn targets(&self) -> Vec<Target> {
        let keywords: Vec<&str> = if self.keywords.is_empty() {
            presets::KEYWORDS.to_vec()
        } else {
            self.keywords.iter().map(String::as_str).collect()
        };
        let cities: Vec<&str> = if self.cities.is_empty() {
            presets::CITIES.to_vec()
        } else {
            self.cities.iter().map(String::as_str).collect()
        };
        build_queries(&keywords, &cities, &self.country)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Google Places text search, one query per keyword and city
    Places {
        #[command(flatten)]
        queries: QueryArgs,

        /// Fetch place details for these ids as well
        #[arg(long = "place-id")]
        place_ids: Vec<String>,

        /// Complete records with the LLM enricher
        #[arg(long)]
        enrich: bool,
    },
    /// Facebook Graph place search
    Facebook {
        #[command(flatten)]
        queries: QueryArgs,
    },
    /// Business websites or directory result pages
    Pages {
        #[arg(required = true)]
        urls: Vec<String>,

        /// JSON file with listing card selectors; without it each page is
        /// treated as a single business site
        #[arg(long)]
        listing_selectors: Option<PathBuf>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        enrich: bool,

        #[command(flatten)]
        follow: FollowArgs,

        /// Render pages in headless Chromium
        #[cfg(feature = "browser")]
        #[arg(long)]
        browser: bool,
    },
    /// Hunter.io email lookup for website domains
    Emails {
        /// Domain or website URL
        #[arg(required = true)]
        domains: Vec<String>,
    },
}

#[derive(Args)]
struct FollowArgs {
    /// Follow links this many hops from the given pages
    #[arg(long)]
    follow_depth: Option<usize>,

    /// Only follow links containing this text; repeatable
    #[arg(long = "link-pattern")]
    link_patterns: Vec<String>,

    /// Only follow links on the same host
    #[arg(long)]
    same_host: bool,

    /// Fetch listing profile pages for missing phone numbers
    #[arg(long)]
    profiles: bool,
}

impl FollowArgs {
    fn apply(&self, follow: &mut FollowConfig) {
        if let Some(depth) = self.follow_depth {
            follow.max_depth = depth;
        }
        if !self.link_patterns.is_empty() {
            follow.link_patterns = self.link_patterns.clone();
        }
        follow.same_host |= self.same_host;
        follow.profiles |= self.profiles;
    }
}

impl CommonArgs {
    fn apply(&self, config: &mut HarvestConfig) -> Result<(), ConfigError> {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(ms) = self.min_interval_ms {
            config.fetch.rate_policy =
                RatePolicy::MinInterval(std::time::Duration::from_millis(ms));
        }
        if let Some(max_attempts) = self.max_attempts {
            config.fetch.retry.max_attempts = max_attempts;
        }
        if let Some(rate_key) = self.rate_key {
            config.fetch.rate_keying = rate_key;
        }
        if !self.proxies.is_empty() {
            config.proxies = self
                .proxies
                .iter()
                .map(|url| ProxyEndpoint::parse(url))
                .collect::<Result<_, _>>()?;
        }
        config.fetch.proxy_required |= self.require_proxy;
        Ok(())
    }
}

struct Plan {
    name: &'static str,
    scraper: Arc<dyn Scraper>,
    extractor: Arc<dyn Extractor>,
    targets: Vec<Target>,
    enrich: bool,
    follow: FollowConfig,
}

fn plan(command: Command, config: &HarvestConfig, pool: Option<&ProxyPool>) -> anyhow::Result<Plan> {
    let plan = match command {
        Command::Places {
            queries,
            place_ids,
            enrich,
        } => {
            let mut scraper = GooglePlacesScraper::new(
                config.google_places_api_key.clone().unwrap_or_default(),
            )?;
            if let Some(pool) = pool {
                scraper = scraper.with_proxies(pool)?;
            }
            let mut targets = queries.targets();
            targets.extend(place_ids.into_iter().map(Target::place_id));
            Plan {
                name: "google_places",
                scraper: Arc::new(scraper),
                extractor: Arc::new(GooglePlacesExtractor::new()),
                targets,
                enrich,
                follow: FollowConfig::default(),
            }
        }
        Command::Facebook { queries } => {
            let mut scraper = FacebookScraper::new(
                config.facebook_access_token.clone().unwrap_or_default(),
            )?;
            if let Some(pool) = pool {
                scraper = scraper.with_proxies(pool)?;
            }
            Plan {
                name: "facebook",
                scraper: Arc::new(scraper),
                extractor: Arc::new(FacebookExtractor::new()),
                targets: queries.targets(),
                enrich: false,
                follow: FollowConfig::default(),
            }
        }
        Command::Pages {
            urls,
            listing_selectors,
            category,
            enrich,
            follow,
            #[cfg(feature = "browser")]
            browser,
        } => {
            let extractor: Arc<dyn Extractor> = match listing_selectors {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let mut extractor = ListingExtractor::new(ListingSelectors::from_json(&raw)?)?;
                    if let Some(category) = &category {
                        extractor = extractor.with_category(category);
                    }
                    Arc::new(extractor)
                }
                None => {
                    let mut extractor = PageExtractor::new()?;
                    if let Some(category) = &category {
                        extractor = extractor.with_category(category);
                    }
                    Arc::new(extractor)
                }
            };

            #[cfg(feature = "browser")]
            let scraper: Arc<dyn Scraper> = if browser {
                use listing_harvester::scrapers::{BrowserOptions, BrowserScraper};
                Arc::new(BrowserScraper::new(BrowserOptions::default()))
            } else {
                http_scraper(pool)?
            };
            #[cfg(not(feature = "browser"))]
            let scraper = http_scraper(pool)?;

            let mut follow_config = config.follow.clone();
            follow.apply(&mut follow_config);

            Plan {
                name: "pages",
                scraper,
                extractor,
                targets: urls.into_iter().map(Target::url).collect(),
                enrich,
                follow: follow_config,
            }
        }
        Command::Emails { domains } => {
            let mut scraper = HunterScraper::new(config.hunter_api_key.clone().unwrap_or_default())?;
            if let Some(pool) = pool {
                scraper = scraper.with_proxies(pool)?;
            }
            let targets = domains
                .into_iter()
                .map(|d| {
                    if d.contains("://") {
                        Target::url(d)
                    } else {
                        Target::domain(d)
                    }
                })
                .collect();
            Plan {
                name: "emails",
                scraper: Arc::new(scraper),
                extractor: Arc::new(HunterExtractor::new()),
                targets,
                enrich: false,
                follow: FollowConfig::default(),
            }
        }
    };
    Ok(plan)
}

fn http_scraper(pool: Option<&ProxyPool>) -> Result<Arc<dyn Scraper>, ConfigError> {
    let mut scraper = HttpScraper::new()?;
    if let Some(pool) = pool {
        scraper = scraper.with_proxies(pool)?;
    }
    Ok(Arc::new(scraper))
}

fn storage(format: OutputFormat, config: &HarvestConfig, name: &str) -> anyhow::Result<StorageManager> {
    let sink = || create_storage(StorageType::new(format, &config.output_dir));
    Ok(StorageManager::new()
        .register_storage(StorageCategory::Data, sink()?, name)
        .register_storage(StorageCategory::Error, sink()?, &format!("{}_errors", name)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("selectors", log::LevelFilter::Warn)
        .filter_module("html5ever", log::LevelFilter::Error)
        .init();

    let cli = Cli::parse();
    let mut config = HarvestConfig::from_env()?;
    cli.common.apply(&mut config)?;

    let pool = config.proxy_pool();
    let plan = plan(cli.command, &config, pool.as_ref())?;

    let extractor = if plan.enrich {
        let enricher = OpenAiEnricher::new(config.llm.clone())?;
        Arc::new(EnrichingExtractor::new(
            plan.extractor,
            Arc::new(enricher),
            config.llm.max_content_chars,
        )) as Arc<dyn Extractor>
    } else {
        plan.extractor
    };

    let fetch_loop = FetchLoop::new(plan.scraper, config.fetch.clone(), pool)?;
    let stats = fetch_loop.stats().clone();
    let cancel = fetch_loop.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after in-flight requests");
            cancel.cancel();
        }
    });

    info!(
        "Harvesting {} target(s) into {}",
        plan.targets.len(),
        config.output_dir.display()
    );
    if plan.follow.is_enabled() {
        info!(
            "Following links up to depth {} and profile pages: {}",
            plan.follow.max_depth, plan.follow.profiles
        );
    }
    let harvester = Harvester::new(extractor, storage(cli.common.format, &config, plan.name)?)
        .with_follow(plan.follow)?;
    let summary = harvester.run(fetch_loop, plan.targets).await?;

    stats.log_summary();
    info!(
        "{} record(s) from {} of {} target(s)",
        summary.records, summary.fetched, summary.targets
    );
    Ok(())
}
