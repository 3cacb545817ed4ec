use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::Scraper;
use crate::core::FetchErrorKind;
use crate::http::{FetchRequest, FetchResponse};

#[derive(Debug, Clone)]
pub enum MockReply {
    Respond {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
    },
    Fail(FetchErrorKind),
    /// Never answers; only the loop's timeout ends the attempt.
    Hang,
    /// Panics inside `fetch`, taking the worker down with it.
    Panic,
}

impl MockReply {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self::Respond {
            status,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            Self::Respond {
                status,
                body,
                mut headers,
            } => {
                headers.push((name.to_string(), value.to_string()));
                Self::Respond {
                    status,
                    body,
                    headers,
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatch {
    pub target: String,
    pub at: Instant,
    pub attempt: usize,
    pub proxy: Option<String>,
}

/// Scripted scraper keyed by target value. Each target pops its replies in
/// order and repeats the last one; unscripted targets answer `200 ok`.
#[derive(Default)]
pub struct MockScraper {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    latency: Duration,
    dispatches: Mutex<Vec<Dispatch>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn script(self, target: &str, replies: Vec<MockReply>) -> Self {
        self.scripts
            .lock()
            .insert(target.to_string(), replies.into_iter().collect());
        self
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().clone()
    }

    pub fn dispatched_targets(&self) -> Vec<String> {
        self.dispatches
            .lock()
            .iter()
            .map(|d| d.target.clone())
            .collect()
    }

    fn next_reply(&self, target: &str) -> MockReply {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(target) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| MockReply::ok("ok")),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| MockReply::ok("ok")),
            None => MockReply::ok("ok"),
        }
    }
}

#[async_trait]
impl Scraper for MockScraper {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchErrorKind> {
        let target = request.target.value().to_string();
        self.dispatches.lock().push(Dispatch {
            target: target.clone(),
            at: Instant::now(),
            attempt: request.attempt,
            proxy: request.proxy.as_ref().map(|p| p.key()),
        });

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        match self.next_reply(&target) {
            MockReply::Respond {
                status,
                body,
                headers,
            } => Ok(FetchResponse::from_request(
                request,
                status,
                headers.into_iter().collect(),
                body.into_bytes(),
            )),
            MockReply::Fail(kind) => Err(kind),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                Err(FetchErrorKind::Timeout)
            }
            MockReply::Panic => panic!("scripted panic for {}", target),
        }
    }
}
