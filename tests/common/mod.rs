#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use recon_guard::clock::ManualClock;
use recon_guard::config::Config;
use recon_guard::discover::HostResolver;
use recon_guard::http_client::{FetchedPage, HttpFetcher};
use recon_guard::orchestrator::{ReconOrchestrator, ReconServices};

/// Serves fixed pages by exact URL; anything else behaves like a refused connection.
#[derive(Default)]
pub struct CannedFetcher {
    pages: HashMap<String, FetchedPage>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl CannedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: FetchedPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    pub fn was_requested(&self, url: &str) -> bool {
        self.requested.lock().iter().any(|u| u == url)
    }
}

#[async_trait]
impl HttpFetcher for CannedFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> anyhow::Result<FetchedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused: {url}"))
    }
}

pub struct FixedResolver(pub Option<IpAddr>);

#[async_trait]
impl HostResolver for FixedResolver {
    async fn resolve(&self, host: &str) -> anyhow::Result<Vec<IpAddr>> {
        self.0
            .map(|ip| vec![ip])
            .ok_or_else(|| anyhow::anyhow!("NXDOMAIN {host}"))
    }
}

pub fn test_config(limit: u32, threshold: u32) -> Config {
    let mut config = Config::default();
    config.rate_limit.limit = limit;
    config.rate_limit.captcha_threshold = threshold;
    config.rate_limit.window_secs = 60;
    config
}

pub fn orchestrator(
    config: &Config,
    fetcher: Arc<CannedFetcher>,
    clock: Arc<ManualClock>,
) -> ReconOrchestrator {
    let resolver = Arc::new(FixedResolver("93.184.216.34".parse().ok()));
    let services = ReconServices::build(config, fetcher, resolver, clock);
    ReconOrchestrator::new(services, config)
}

/// Answer a "What is a op b?" question.
pub fn solve(question: &str) -> String {
    let parts: Vec<&str> = question
        .trim_start_matches("What is ")
        .trim_end_matches('?')
        .split(' ')
        .collect();
    let a: u32 = parts[0].parse().unwrap();
    let b: u32 = parts[2].parse().unwrap();
    let answer = match parts[1] {
        "+" => a + b,
        "-" => a - b,
        "×" => a * b,
        op => panic!("unexpected operator {op}"),
    };
    answer.to_string()
}
