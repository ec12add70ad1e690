//! Platform detection and exposure probing for a single target.
//!
//! Network and parse failures never escape this module: an unreachable target is
//! reported as `Dead` and anything unrecognisable as `Unknown`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::analyze::signatures::{
    default_signatures, infrastructure_label, Signature, SECURITY_PROBES, SENSITIVE_PAGES,
};
use crate::config::ProbeConfig;
use crate::http_client::{FetchedPage, HttpFetcher};

pub const DEAD_LABEL: &str = "Dead";
pub const UNKNOWN_LABEL: &str = "Unknown";
pub const INFRASTRUCTURE_CONFIDENCE: u8 = 95;
pub const SENSITIVE_PAGE_CONFIDENCE: u8 = 80;
const CONFIDENCE_PER_MATCH: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub label: String,
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<Vec<String>>,
}

impl DetectionResult {
    fn new(label: impl Into<String>, confidence: u8, findings: Vec<String>) -> Self {
        Self {
            label: label.into(),
            confidence,
            vulnerabilities: if findings.is_empty() { None } else { Some(findings) },
        }
    }

    pub fn dead() -> Self {
        Self::new(DEAD_LABEL, 100, Vec::new())
    }

    pub fn is_dead(&self) -> bool {
        self.label == DEAD_LABEL
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub index: usize,
    pub name: String,
    pub confidence: u8,
}

/// Strip scheme and trailing slash; lowercase the host part.
pub fn normalize_target(input: &str) -> String {
    let trimmed = input.trim();
    let lower_prefix = trimmed.to_ascii_lowercase();
    let rest = if lower_prefix.starts_with("https://") {
        &trimmed[8..]
    } else if lower_prefix.starts_with("http://") {
        &trimmed[7..]
    } else {
        trimmed
    };
    let rest = rest.trim_end_matches('/');
    match rest.split_once('/') {
        Some((host, path)) => format!("{}/{}", host.to_ascii_lowercase(), path),
        None => rest.to_ascii_lowercase(),
    }
}

/// Host part of a normalized target: path and port dropped. IPv6 literals are kept whole.
pub fn target_host(normalized: &str) -> &str {
    let host = normalized.split('/').next().unwrap_or(normalized);
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}

/// Score every signature against one response. Candidates with at least one match are
/// returned by descending confidence; equal scores keep table order.
pub fn rank_candidates(signatures: &[Signature], page: &FetchedPage) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = signatures
        .iter()
        .enumerate()
        .filter_map(|(index, sig)| {
            let matches = sig.count_matches(page);
            (matches > 0).then(|| Candidate {
                index,
                name: sig.name.clone(),
                confidence: (matches * CONFIDENCE_PER_MATCH).min(100) as u8,
            })
        })
        .collect();
    // sort_by is stable
    candidates.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    candidates
}

/// True when the page carries a password field or a login/registration form.
pub fn looks_like_login_form(body: &str) -> bool {
    let document = Html::parse_document(body);
    let password = Selector::parse(r#"input[type="password"], input[name="password"]"#).ok();
    if password.is_some_and(|sel| document.select(&sel).next().is_some()) {
        return true;
    }
    let Ok(forms) = Selector::parse("form") else { return false };
    document.select(&forms).any(|form| {
        let el = form.value();
        let hint = [el.attr("action"), el.attr("id"), el.attr("class"), el.attr("name")]
            .into_iter()
            .flatten()
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        ["login", "signin", "sign-in", "register", "signup"].iter().any(|k| hint.contains(k))
    })
}

pub struct FingerprintMatcher {
    fetcher: Arc<dyn HttpFetcher>,
    signatures: Vec<Signature>,
    fetch_timeout: Duration,
    probe_timeout: Duration,
}

impl FingerprintMatcher {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: &ProbeConfig) -> Self {
        Self {
            fetcher,
            signatures: default_signatures().to_vec(),
            fetch_timeout: config.fetch_timeout(),
            probe_timeout: config.probe_timeout(),
        }
    }

    pub fn with_signatures(mut self, signatures: Vec<Signature>) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Identify the platform behind `target` and flag exposed artifacts.
    pub async fn detect(&self, target: &str) -> DetectionResult {
        self.run(target, false).await
    }

    /// `detect` plus the winning platform's own sensitive paths.
    pub async fn scan(&self, target: &str) -> DetectionResult {
        self.run(target, true).await
    }

    async fn run(&self, target: &str, full_scan: bool) -> DetectionResult {
        let host = normalize_target(target);

        if let Some(label) = infrastructure_label(&host) {
            tracing::debug!(%host, label, "infrastructure host, skipping fetch");
            return DetectionResult::new(label, INFRASTRUCTURE_CONFIDENCE, Vec::new());
        }

        let Some((base, page)) = self.fetch_with_fallback(&host).await else {
            tracing::debug!(%host, "target unreachable over http and https");
            return DetectionResult::dead();
        };

        let candidates = rank_candidates(&self.signatures, &page);
        let mut findings = self.probe_security(&base).await;

        if let Some(top) = candidates.first() {
            if full_scan {
                let platform = &self.signatures[top.index];
                findings.extend(self.probe_platform_paths(&base, platform).await);
            }
            return DetectionResult::new(top.name.clone(), top.confidence, findings);
        }

        match self.find_sensitive_page(&base).await {
            Some(path) => DetectionResult::new(
                format!("Sensitive page discovered: {path}"),
                SENSITIVE_PAGE_CONFIDENCE,
                findings,
            ),
            None => DetectionResult::new(UNKNOWN_LABEL, 0, findings),
        }
    }

    /// Plain HTTP first, then one retry over TLS. Returns the base URL that answered.
    async fn fetch_with_fallback(&self, host: &str) -> Option<(String, FetchedPage)> {
        for scheme in ["http", "https"] {
            let base = format!("{scheme}://{host}");
            match self.fetcher.fetch(&base, self.fetch_timeout).await {
                Ok(page) if page.is_success() => return Some((base, page)),
                Ok(page) => tracing::debug!(url = %base, status = page.status, "non-success status"),
                Err(e) => tracing::debug!(url = %base, error = %e, "fetch failed"),
            }
        }
        None
    }

    async fn get_body(&self, url: String) -> Option<FetchedPage> {
        match self.fetcher.fetch(&url, self.probe_timeout).await {
            Ok(page) => Some(page),
            Err(e) => {
                tracing::debug!(%url, error = %e, "probe failed");
                None
            }
        }
    }

    async fn probe_security(&self, base: &str) -> Vec<String> {
        let probes = SECURITY_PROBES.iter().map(|probe| async move {
            let page = self.get_body(format!("{base}{}", probe.path)).await?;
            probe.is_hit(&page.body).then(|| probe.finding.to_string())
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    async fn probe_platform_paths(&self, base: &str, platform: &Signature) -> Vec<String> {
        let probes = platform.probe_paths.iter().map(|path| async move {
            let page = self.get_body(format!("{base}{path}")).await?;
            (page.is_success() && !page.body.trim().is_empty())
                .then(|| format!("Exposed {} path: {path}", platform.name))
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    async fn find_sensitive_page(&self, base: &str) -> Option<&'static str> {
        let probes = SENSITIVE_PAGES.iter().map(|path| async move {
            let page = self.get_body(format!("{base}{path}")).await?;
            (page.is_success() && looks_like_login_form(&page.body)).then_some(*path)
        });
        join_all(probes).await.into_iter().flatten().next()
    }
}
