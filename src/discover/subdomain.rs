use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::analyze::fingerprint::target_host;
use crate::http_client::HttpFetcher;

/// Subdomain enumeration through Certificate Transparency logs (crt.sh).
pub struct SubdomainEnumerator {
    fetcher: Arc<dyn HttpFetcher>,
    timeout: Duration,
}

impl SubdomainEnumerator {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    /// Sorted, deduplicated names under `domain`. Wildcard entries are dropped.
    pub async fn enumerate(&self, domain: &str) -> anyhow::Result<Vec<String>> {
        let domain = target_host(domain);
        let url = crtsh_url(domain);
        tracing::debug!("Querying crt.sh for domain: {}", domain);

        let page = self.fetcher.fetch(&url, self.timeout).await?;
        if !page.is_success() {
            bail!("crt.sh returned status: {}", page.status);
        }

        let subdomains = parse_crtsh(&page.body, domain)?;
        tracing::info!("crt.sh found {} subdomains", subdomains.len());
        Ok(subdomains)
    }
}

pub fn crtsh_url(domain: &str) -> String {
    format!("https://crt.sh/?q={}&output=json", urlencoding::encode(&format!("%.{domain}")))
}

#[derive(Debug, Deserialize)]
struct CrtShEntry {
    common_name: Option<String>,
    name_value: Option<String>,
}

pub fn parse_crtsh(body: &str, domain: &str) -> anyhow::Result<Vec<String>> {
    let entries: Vec<CrtShEntry> =
        serde_json::from_str(body).context("Failed to parse crt.sh JSON")?;
    let domain = domain.to_ascii_lowercase();
    let suffix = format!(".{domain}");
    let belongs = |name: &str| name == domain || name.ends_with(&suffix);

    let mut subdomains = BTreeSet::new();
    for entry in entries {
        // name_value can hold several names separated by newlines
        let names = entry
            .common_name
            .into_iter()
            .chain(entry.name_value.into_iter().flat_map(|nv| {
                nv.split('\n').map(str::to_string).collect::<Vec<_>>()
            }));
        for name in names {
            let name = name.trim().to_ascii_lowercase();
            if !name.is_empty() && !name.starts_with('*') && belongs(&name) {
                subdomains.insert(name);
            }
        }
    }
    Ok(subdomains.into_iter().collect())
}
