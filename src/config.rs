use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rate_limit: RateLimitConfig,
    pub captcha: CaptchaConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
    pub probe: ProbeConfig,
}

impl Config {
    /// Read a JSON config file. Missing sections and fields fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window before plain rejection.
    pub limit: u32,
    /// Requests per window after which a challenge is demanded.
    pub captcha_threshold: u32,
    pub window_secs: u64,
    /// A solved challenge resets the count to `limit / captcha_credit_divisor`.
    pub captcha_credit_divisor: u32,
    pub sweep_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            captcha_threshold: 15,
            window_secs: 15 * 60,
            captcha_credit_divisor: 2,
            sweep_secs: 15 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_every(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    pub ttl_secs: u64,
    pub sweep_secs: u64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self { ttl_secs: 10 * 60, sweep_secs: 5 * 60 }
    }
}

impl CaptchaConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_every(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub reverse_ttl_secs: u64,
    pub subdomain_ttl_secs: u64,
    pub cms_ttl_secs: u64,
    pub vuln_ttl_secs: u64,
    pub event_log_cap: usize,
    pub sweep_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reverse_ttl_secs: 3600,
            subdomain_ttl_secs: 3600,
            cms_ttl_secs: 24 * 3600,
            vuln_ttl_secs: 3600,
            event_log_cap: 1000,
            sweep_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn sweep_every(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub fetch_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub lookup_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 5,
            probe_timeout_secs: 3,
            lookup_timeout_secs: 5,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"rate_limit": {"limit": 3}, "log": {"capacity": 50}}"#).unwrap();
        assert_eq!(config.rate_limit.limit, 3);
        assert_eq!(config.rate_limit.captcha_threshold, 15);
        assert_eq!(config.log.capacity, 50);
        assert_eq!(config.cache.cms_ttl_secs, 86_400);
        assert_eq!(config.probe.fetch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
