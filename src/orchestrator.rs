//! End-to-end recon workflows: rate limiting, challenges, caching, logging.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::analyze::fingerprint::{normalize_target, target_host, DetectionResult, FingerprintMatcher};
use crate::cache::{CacheStats, ExpiringCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::discover::{HickoryResolver, HostResolver, ReverseIpLookup, SubdomainEnumerator};
use crate::guard::captcha::{ChallengeIssuer, ChallengePrompt};
use crate::guard::rate_limiter::{RateLimitInfo, RateLimiter};
use crate::http_client::{HttpFetcher, ReqwestFetcher};
use crate::output::result_log::{LogAction, LogEntry, ResultLogger};
use crate::sweeper::{spawn_sweeper, Sweep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Reverse,
    Subdomain,
    Cms,
    VulnScan,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Reverse => "reverse",
            Operation::Subdomain => "subdomain",
            Operation::Cms => "cms",
            Operation::VulnScan => "vuln-scan",
        }
    }

    pub fn log_action(&self) -> LogAction {
        match self {
            Operation::Reverse => LogAction::ReverseLookup,
            Operation::Subdomain => LogAction::SubdomainLookup,
            Operation::Cms => LogAction::CmsCheck,
            Operation::VulnScan => LogAction::VulnScan,
        }
    }

    pub fn cache_key(&self, normalized: &str) -> String {
        format!("{}:{}", self.as_str(), normalized)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reverse" | "reverse-ip" => Ok(Operation::Reverse),
            "subdomain" | "subdomains" => Ok(Operation::Subdomain),
            "cms" => Ok(Operation::Cms),
            "vuln-scan" | "vuln" | "scan" => Ok(Operation::VulnScan),
            other => Err(anyhow::anyhow!("unknown operation: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconRequest {
    pub target: String,
    pub client_key: String,
    pub user_agent: String,
    pub operation: Operation,
    /// Internal callers may skip rate limiting entirely.
    pub bypass_rate_limit: bool,
}

impl ReconRequest {
    pub fn new(operation: Operation, target: &str, client_key: &str) -> Self {
        Self {
            target: target.to_string(),
            client_key: client_key.to_string(),
            user_agent: String::new(),
            operation,
            bypass_rate_limit: false,
        }
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn bypass(mut self, bypass: bool) -> Self {
        self.bypass_rate_limit = bypass;
        self
    }
}

/// Operation-specific result. This is what gets cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReconPayload {
    Domains { domains: Vec<String> },
    Subdomains { subdomains: Vec<String> },
    Detection(DetectionResult),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconResponse {
    Success {
        payload: ReconPayload,
        cached: bool,
        rate: RateLimitInfo,
    },
    ChallengeRequired {
        challenge: ChallengePrompt,
        rate: RateLimitInfo,
    },
    RateLimited {
        reset_at: u64,
        rate: RateLimitInfo,
    },
    /// A discovery lookup failed outright (upstream down, malformed reply).
    Unavailable {
        error: String,
        rate: RateLimitInfo,
    },
}

impl ReconResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            ReconResponse::Success { .. } => 200,
            ReconResponse::ChallengeRequired { .. } | ReconResponse::RateLimited { .. } => 429,
            ReconResponse::Unavailable { .. } => 502,
        }
    }

    pub fn rate(&self) -> &RateLimitInfo {
        match self {
            ReconResponse::Success { rate, .. }
            | ReconResponse::ChallengeRequired { rate, .. }
            | ReconResponse::RateLimited { rate, .. }
            | ReconResponse::Unavailable { rate, .. } => rate,
        }
    }

    pub fn rate_limit_headers(&self) -> [(&'static str, String); 3] {
        let rate = self.rate();
        [
            ("X-RateLimit-Limit", rate.limit.to_string()),
            ("X-RateLimit-Remaining", rate.remaining.to_string()),
            ("X-RateLimit-Reset", rate.reset_at.to_string()),
        ]
    }

    pub fn body(&self) -> Value {
        match self {
            ReconResponse::Success { payload, .. } => {
                serde_json::to_value(payload).unwrap_or(Value::Null)
            }
            ReconResponse::ChallengeRequired { challenge, .. } => json!({
                "error": "Too many requests. Please solve the captcha to continue.",
                "captchaRequired": true,
                "captcha": { "id": challenge.id, "question": challenge.question },
            }),
            ReconResponse::RateLimited { reset_at, .. } => json!({
                "error": "Too many requests. Please try again later.",
                "resetAt": reset_at,
            }),
            ReconResponse::Unavailable { error, .. } => json!({ "error": error }),
        }
    }

    pub fn payload(&self) -> Option<&ReconPayload> {
        match self {
            ReconResponse::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaSubmission {
    pub challenge_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptchaVerdict {
    pub success: bool,
}

#[derive(Debug, Clone)]
struct CacheTtls {
    reverse: Duration,
    subdomain: Duration,
    cms: Duration,
    vuln_scan: Duration,
}

impl CacheTtls {
    fn for_operation(&self, op: Operation) -> Duration {
        match op {
            Operation::Reverse => self.reverse,
            Operation::Subdomain => self.subdomain,
            Operation::Cms => self.cms,
            Operation::VulnScan => self.vuln_scan,
        }
    }
}

/// Services the orchestrator composes. Built once by the host application.
pub struct ReconServices {
    pub clock: Arc<dyn Clock>,
    pub limiter: Arc<RateLimiter>,
    pub issuer: Arc<ChallengeIssuer>,
    pub cache: Arc<ExpiringCache<ReconPayload>>,
    pub logger: Arc<ResultLogger>,
    pub matcher: Arc<FingerprintMatcher>,
    pub subdomains: Arc<SubdomainEnumerator>,
    pub reverse_ip: Arc<ReverseIpLookup>,
}

impl ReconServices {
    /// Wire every service against the given network seams and clock.
    pub fn build(
        config: &Config,
        fetcher: Arc<dyn HttpFetcher>,
        resolver: Arc<dyn HostResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let lookup_timeout = config.probe.lookup_timeout();
        Self {
            limiter: Arc::new(RateLimiter::new(&config.rate_limit, clock.clone())),
            issuer: Arc::new(ChallengeIssuer::new(clock.clone(), config.captcha.ttl())),
            cache: Arc::new(ExpiringCache::with_event_cap(clock.clone(), config.cache.event_log_cap)),
            logger: Arc::new(ResultLogger::new(config.log.capacity)),
            matcher: Arc::new(FingerprintMatcher::new(fetcher.clone(), &config.probe)),
            subdomains: Arc::new(SubdomainEnumerator::new(fetcher.clone(), lookup_timeout)),
            reverse_ip: Arc::new(ReverseIpLookup::new(fetcher, resolver, lookup_timeout)),
            clock,
        }
    }
}

#[derive(Debug, Clone)]
struct SweepSchedule {
    cache: Duration,
    challenges: Duration,
    rate_windows: Duration,
}

pub struct ReconOrchestrator {
    services: ReconServices,
    ttls: CacheTtls,
    sweeps: SweepSchedule,
}

impl ReconOrchestrator {
    pub fn new(services: ReconServices, config: &Config) -> Self {
        let c = &config.cache;
        Self {
            services,
            ttls: CacheTtls {
                reverse: Duration::from_secs(c.reverse_ttl_secs),
                subdomain: Duration::from_secs(c.subdomain_ttl_secs),
                cms: Duration::from_secs(c.cms_ttl_secs),
                vuln_scan: Duration::from_secs(c.vuln_ttl_secs),
            },
            sweeps: SweepSchedule {
                cache: config.cache.sweep_every(),
                challenges: config.captcha.sweep_every(),
                rate_windows: config.rate_limit.sweep_every(),
            },
        }
    }

    /// Production wiring: reqwest fetcher, system DNS resolver, wall clock.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let fetcher = Arc::new(ReqwestFetcher::new(&config.probe.user_agent, config.probe.fetch_timeout())?);
        let resolver = Arc::new(HickoryResolver::from_system());
        let services = ReconServices::build(config, fetcher, resolver, Arc::new(SystemClock));
        Ok(Self::new(services, config))
    }

    pub fn services(&self) -> &ReconServices {
        &self.services
    }

    pub async fn execute(&self, request: ReconRequest) -> ReconResponse {
        let started = Instant::now();
        let key = request.client_key.as_str();
        let s = &self.services;

        if !request.bypass_rate_limit && s.limiter.is_rate_limited(key) {
            let rate = s.limiter.snapshot(key);
            if s.limiter.requires_captcha(key) {
                let challenge = s.issuer.generate();
                tracing::info!(client_key = key, challenge_id = %challenge.id, "captcha required");
                return ReconResponse::ChallengeRequired { challenge, rate };
            }
            return ReconResponse::RateLimited { reset_at: rate.reset_at, rate };
        }

        let normalized = normalize_target(&request.target);
        // reverse and subdomain lookups key on the bare host
        let normalized = match request.operation {
            Operation::Reverse | Operation::Subdomain => target_host(&normalized).to_string(),
            Operation::Cms | Operation::VulnScan => normalized,
        };
        let cache_key = request.operation.cache_key(&normalized);

        if let Some(payload) = s.cache.get(&cache_key) {
            self.record(&request, &normalized, &payload, started, true);
            return ReconResponse::Success { payload, cached: true, rate: s.limiter.snapshot(key) };
        }

        let outcome = match request.operation {
            Operation::Cms => Ok(ReconPayload::Detection(s.matcher.detect(&normalized).await)),
            Operation::VulnScan => Ok(ReconPayload::Detection(s.matcher.scan(&normalized).await)),
            Operation::Subdomain => s
                .subdomains
                .enumerate(&normalized)
                .await
                .map(|subdomains| ReconPayload::Subdomains { subdomains }),
            Operation::Reverse => s
                .reverse_ip
                .lookup(&normalized)
                .await
                .map(|domains| ReconPayload::Domains { domains }),
        };
        let rate = s.limiter.snapshot(key);

        match outcome {
            Ok(payload) => {
                s.cache.set(&cache_key, payload.clone(), self.ttls.for_operation(request.operation));
                self.record(&request, &normalized, &payload, started, false);
                ReconResponse::Success { payload, cached: false, rate }
            }
            Err(e) => {
                let error = format!("{} lookup failed: {e:#}", request.operation);
                tracing::warn!(client_key = key, target = %normalized, error = %error, "lookup failed");
                self.log_entry(&request, &normalized, json!({ "error": error }), started, false);
                ReconResponse::Unavailable { error, rate }
            }
        }
    }

    /// Check a challenge answer and, if correct, restore part of the client's budget.
    pub fn verify_captcha(&self, client_key: &str, submission: &CaptchaSubmission) -> CaptchaVerdict {
        let success = self
            .services
            .issuer
            .verify(&submission.challenge_id, &submission.answer);
        if success {
            self.services.limiter.set_captcha_verified(client_key);
            tracing::info!(client_key, "captcha verified");
        } else {
            tracing::debug!(client_key, challenge_id = %submission.challenge_id, "captcha rejected");
        }
        CaptchaVerdict { success }
    }

    /// Start the cache, challenge and rate-window sweepers. They stop when `shutdown` fires.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let stores: [(Arc<dyn Sweep>, Duration); 3] = [
            (self.services.cache.clone(), self.sweeps.cache),
            (self.services.issuer.clone(), self.sweeps.challenges),
            (self.services.limiter.clone(), self.sweeps.rate_windows),
        ];
        stores
            .into_iter()
            .map(|(store, every)| spawn_sweeper(store, every, shutdown.clone()))
            .collect()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.services.logger.get_logs()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.services.cache.stats()
    }

    fn record(&self, request: &ReconRequest, query: &str, payload: &ReconPayload, started: Instant, cached: bool) {
        let results = serde_json::to_value(payload).unwrap_or(Value::Null);
        self.log_entry(request, query, results, started, cached);
    }

    fn log_entry(&self, request: &ReconRequest, query: &str, results: Value, started: Instant, cached: bool) {
        self.services.logger.log(LogEntry {
            timestamp: self.services.clock.now_ms(),
            action: request.operation.log_action(),
            query: query.to_string(),
            results,
            client_key: request.client_key.clone(),
            user_agent: request.user_agent.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            cached,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_parsing_and_keys() {
        assert_eq!("vuln-scan".parse::<Operation>().unwrap(), Operation::VulnScan);
        assert_eq!("Reverse".parse::<Operation>().unwrap(), Operation::Reverse);
        assert!("whois".parse::<Operation>().is_err());
        assert_eq!(Operation::Cms.cache_key("example.com"), "cms:example.com");
    }

    #[test]
    fn challenge_body_never_contains_answer() {
        let rate = RateLimitInfo { limit: 10, remaining: 0, reset_at: 99 };
        let resp = ReconResponse::ChallengeRequired {
            challenge: ChallengePrompt { id: "abc".into(), question: "What is 7 + 5?".into() },
            rate,
        };
        let body = resp.body();
        assert_eq!(resp.status_code(), 429);
        assert_eq!(body["captchaRequired"], true);
        assert_eq!(body["captcha"], json!({"id": "abc", "question": "What is 7 + 5?"}));
        assert!(!body.to_string().contains("12"));
    }

    #[test]
    fn rate_limited_body_and_headers() {
        let rate = RateLimitInfo { limit: 10, remaining: 0, reset_at: 1234 };
        let resp = ReconResponse::RateLimited { reset_at: 1234, rate };
        assert_eq!(resp.body()["resetAt"], 1234);
        let headers = resp.rate_limit_headers();
        assert_eq!(headers[0], ("X-RateLimit-Limit", "10".to_string()));
        assert_eq!(headers[2], ("X-RateLimit-Reset", "1234".to_string()));
    }

    #[test]
    fn payload_shapes() {
        let p = ReconPayload::Subdomains { subdomains: vec!["a.example.com".into()] };
        assert_eq!(serde_json::to_value(&p).unwrap(), json!({"subdomains": ["a.example.com"]}));
        let d = ReconPayload::Detection(DetectionResult::dead());
        assert_eq!(serde_json::to_value(&d).unwrap(), json!({"label": "Dead", "confidence": 100}));
    }
}
