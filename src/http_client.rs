use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};

/// Upper bound on how much of a response body is kept for matching.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// The parts of an HTTP response the matcher and lookups care about.
/// Header names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchedPage {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, headers: HashMap::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Minimal HTTP GET abstraction so detection can run against canned responses.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// GET `url`, giving up after `timeout`. Any HTTP status is `Ok`; only transport
    /// failures and timeouts are errors.
    async fn fetch(&self, url: &str, timeout: Duration) -> anyhow::Result<FetchedPage>;
}

/// Build the shared client: pooled connections, compression, browser User-Agent.
pub fn create_recon_client(user_agent: &str, connect_timeout: Duration) -> anyhow::Result<Client> {
    let client = ClientBuilder::new()
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .gzip(true)
        .brotli(true)
        .use_rustls_tls()
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(user_agent)
        // targets are arbitrary customer sites; a bad certificate is still a live site
        .danger_accept_invalid_certs(true)
        .build()
        .context("building HTTP client")?;
    Ok(client)
}

pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { client: create_recon_client(user_agent, connect_timeout)? })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> anyhow::Result<FetchedPage> {
        let request = async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status().as_u16();

            let mut headers: HashMap<String, String> = HashMap::new();
            for (name, value) in resp.headers() {
                let Ok(value) = value.to_str() else { continue };
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|v| {
                        v.push_str(", ");
                        v.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }

            let bytes = resp.bytes().await?;
            let slice = &bytes[..bytes.len().min(MAX_BODY_BYTES)];
            let body = String::from_utf8_lossy(slice).into_owned();
            Ok::<_, reqwest::Error>(FetchedPage { status, headers, body })
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => Err(anyhow!(e).context(format!("GET {url}"))),
            Err(_) => Err(anyhow!("GET {url} timed out after {}ms", timeout.as_millis())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = create_recon_client(crate::config::BROWSER_USER_AGENT, Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let page = FetchedPage::new(200, "").with_header("X-Powered-By", "PHP/8.2");
        assert_eq!(page.header("x-powered-by"), Some("PHP/8.2"));
        assert_eq!(page.header("X-POWERED-BY"), Some("PHP/8.2"));
        assert!(page.is_success());
        assert!(!FetchedPage::new(404, "").is_success());
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let fetcher = ReqwestFetcher::new("test", Duration::from_secs(1)).unwrap();
        // port 9 (discard) is closed on practically every test host
        let res = fetcher.fetch("http://127.0.0.1:9/", Duration::from_secs(2)).await;
        assert!(res.is_err());
    }
}
