//! Headless Chromium fetcher for pages that need JavaScript.

use async_trait::async_trait;
use chromiumoxide::auth::Credentials;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::Scraper;
use crate::core::{ConfigError, FetchErrorKind};
use crate::http::{FetchRequest, FetchResponse};
use crate::proxy::ProxyEndpoint;

const DIRECT: &str = "direct";

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Extra wait after navigation for scripts that render listings late.
    pub settle: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            settle: Duration::from_secs(2),
        }
    }
}

/// One Chromium instance per proxy server, launched on first use.
pub struct BrowserScraper {
    options: BrowserOptions,
    browsers: Mutex<HashMap<String, Arc<Browser>>>,
}

impl BrowserScraper {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            browsers: Mutex::new(HashMap::new()),
        }
    }

    async fn browser_for(
        &self,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Arc<Browser>, FetchErrorKind> {
        let key = proxy.map(|p| p.key()).unwrap_or_else(|| DIRECT.to_string());
        let mut browsers = self.browsers.lock().await;
        if let Some(browser) = browsers.get(&key) {
            return Ok(Arc::clone(browser));
        }

        let config = launch_config(&self.options, proxy)
            .map_err(|e| FetchErrorKind::Connection(e.to_string()))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchErrorKind::Connection(format!("failed to launch browser: {}", e)))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        debug!("Launched browser for {}", key);
        let browser = Arc::new(browser);
        browsers.insert(key, Arc::clone(&browser));
        Ok(browser)
    }
}

/// Holds a value that needs async cleanup. The cleanup runs on
/// [`close`](Self::close), or on a spawned task if the owner is dropped
/// first, e.g. when the loop abandons a fetch at its deadline.
struct CloseOnDrop<T, F, Fut>
where
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    inner: Option<(T, F)>,
}

impl<T, F, Fut> CloseOnDrop<T, F, Fut>
where
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn new(value: T, close: F) -> Self {
        Self {
            inner: Some((value, close)),
        }
    }

    async fn close(mut self) {
        if let Some((value, close)) = self.inner.take() {
            close(value).await;
        }
    }
}

impl<T, F, Fut> Drop for CloseOnDrop<T, F, Fut>
where
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn drop(&mut self) {
        if let Some((value, close)) = self.inner.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(close(value));
            }
        }
    }
}

fn proxy_server_arg(endpoint: &ProxyEndpoint) -> String {
    format!("--proxy-server={}", endpoint.key())
}

fn launch_config(
    options: &BrowserOptions,
    proxy: Option<&ProxyEndpoint>,
) -> Result<BrowserConfig, ConfigError> {
    let mut builder = BrowserConfig::builder()
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-blink-features=AutomationControlled");

    if !options.headless {
        builder = builder.with_head();
    }

    // Credentials are answered per page through the Fetch domain; Chromium
    // ignores them in --proxy-server.
    if let Some(endpoint) = proxy {
        builder = builder.arg(proxy_server_arg(endpoint));
    }

    builder.build().map_err(ConfigError::Client)
}

#[async_trait]
impl Scraper for BrowserScraper {
    fn name(&self) -> &str {
        "browser"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchErrorKind> {
        let browser = self.browser_for(request.proxy.as_ref()).await?;
        let started = Instant::now();

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchErrorKind::Connection(e.to_string()))?;
        let target = request.target.to_string();
        let tab = CloseOnDrop::new(page.clone(), move |page: Page| async move {
            if let Err(e) = page.close().await {
                debug!("Failed to close page for {}: {}", target, e);
            }
        });

        let content = async {
            if let Some((username, password)) =
                request.proxy.as_ref().and_then(ProxyEndpoint::credentials)
            {
                page.authenticate(Credentials { username, password }).await?;
            }
            page.goto(request.url.as_str()).await?;
            tokio::time::sleep(self.options.settle).await;
            page.content().await
        }
        .await;
        tab.close().await;

        let content = content.map_err(|e| FetchErrorKind::Connection(e.to_string()))?;
        let headers = HashMap::from([(
            "content-type".to_string(),
            "text/html; charset=utf-8".to_string(),
        )]);

        // The DevTools page API does not surface the document status.
        let mut response = FetchResponse::from_request(request, 200, headers, content.into_bytes());
        response.latency = started.elapsed();
        Ok(response)
    }
}
