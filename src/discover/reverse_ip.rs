use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::analyze::fingerprint::target_host;
use crate::http_client::HttpFetcher;

const REVERSE_IP_API: &str = "https://api.hackertarget.com/reverseiplookup/?q=";

#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> anyhow::Result<Vec<IpAddr>>;

    /// PTR names for `ip`. Resolvers without reverse DNS return nothing.
    async fn reverse(&self, _ip: IpAddr) -> Vec<String> {
        Vec::new()
    }
}

pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryResolver {
    /// System resolver configuration, or public defaults when it cannot be read.
    pub fn from_system() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "system resolver config unavailable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

#[async_trait]
impl HostResolver for HickoryResolver {
    async fn resolve(&self, host: &str) -> anyhow::Result<Vec<IpAddr>> {
        let lookup = self.resolver.lookup_ip(host).await?;
        Ok(lookup.iter().collect())
    }

    async fn reverse(&self, ip: IpAddr) -> Vec<String> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(names) => names
                .iter()
                .map(|n| n.to_string().trim_end_matches('.').to_ascii_lowercase())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Domains hosted on the same address as a target.
pub struct ReverseIpLookup {
    fetcher: Arc<dyn HttpFetcher>,
    resolver: Arc<dyn HostResolver>,
    timeout: Duration,
}

impl ReverseIpLookup {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, resolver: Arc<dyn HostResolver>, timeout: Duration) -> Self {
        Self { fetcher, resolver, timeout }
    }

    pub async fn lookup(&self, target: &str) -> anyhow::Result<Vec<String>> {
        let ip = self.resolve_target(target).await?;
        let url = format!("{REVERSE_IP_API}{ip}");
        let page = self.fetcher.fetch(&url, self.timeout).await?;
        if !page.is_success() {
            bail!("reverse IP service returned status: {}", page.status);
        }

        let mut domains: BTreeSet<String> = parse_reverse_ip(&page.body)?.into_iter().collect();
        match tokio::time::timeout(self.timeout, self.resolver.reverse(ip)).await {
            Ok(names) => domains.extend(names),
            Err(_) => tracing::debug!(%ip, "PTR lookup timed out"),
        }
        tracing::debug!(%ip, found = domains.len(), "reverse IP lookup finished");
        Ok(domains.into_iter().collect())
    }

    async fn resolve_target(&self, target: &str) -> anyhow::Result<IpAddr> {
        let host = target_host(target);
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let resolved = tokio::time::timeout(self.timeout, self.resolver.resolve(host))
            .await
            .map_err(|_| anyhow!("resolving {host} timed out"))??;
        resolved
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no address records for {host}"))
    }
}

/// One domain per line. The service reports problems in-band as plain text.
pub fn parse_reverse_ip(body: &str) -> anyhow::Result<Vec<String>> {
    let trimmed = body.trim();
    if trimmed.starts_with("No DNS A records found") {
        return Ok(Vec::new());
    }
    if trimmed.to_ascii_lowercase().starts_with("error") || trimmed.contains("API count exceeded") {
        bail!("reverse IP service error: {}", trimmed.lines().next().unwrap_or_default());
    }
    Ok(trimmed
        .lines()
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::FetchedPage;

    struct OneReply(&'static str);

    #[async_trait]
    impl HttpFetcher for OneReply {
        async fn fetch(&self, _url: &str, _timeout: Duration) -> anyhow::Result<FetchedPage> {
            Ok(FetchedPage::new(200, self.0))
        }
    }

    struct HangingPtr;

    #[async_trait]
    impl HostResolver for HangingPtr {
        async fn resolve(&self, _host: &str) -> anyhow::Result<Vec<IpAddr>> {
            Ok(vec!["10.0.0.1".parse()?])
        }

        async fn reverse(&self, _ip: IpAddr) -> Vec<String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ptr_lookup_is_cut_off() {
        let lookup = ReverseIpLookup::new(
            Arc::new(OneReply("a.com\nb.com")),
            Arc::new(HangingPtr),
            Duration::from_secs(5),
        );
        let domains = lookup.lookup("example.com/blog").await.unwrap();
        assert_eq!(domains, vec!["a.com", "b.com"]);
    }

    #[test]
    fn parses_domain_lines() {
        let domains = parse_reverse_ip("a.com\nB.com\n\n").unwrap();
        assert_eq!(domains, vec!["a.com", "b.com"]);
    }

    #[test]
    fn no_records_is_empty() {
        assert!(parse_reverse_ip("No DNS A records found for 1.2.3.4").unwrap().is_empty());
    }

    #[test]
    fn in_band_errors() {
        assert!(parse_reverse_ip("error check your search parameter").is_err());
        assert!(parse_reverse_ip("API count exceeded - Increase Quota with Membership").is_err());
    }
}
