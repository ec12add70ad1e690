//! Static recognition tables: platform signatures, infrastructure hostnames,
//! and the paths probed for exposed artifacts.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::http_client::FetchedPage;

#[derive(Debug, Clone)]
pub struct HeaderPattern {
    pub header: String,
    pub value: Regex,
}

/// A named set of body substrings and header expectations identifying one platform.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub content_patterns: Vec<String>,
    pub header_patterns: Vec<HeaderPattern>,
    pub probe_paths: Vec<String>,
}

impl Signature {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            content_patterns: Vec::new(),
            header_patterns: Vec::new(),
            probe_paths: Vec::new(),
        }
    }

    pub fn content(mut self, patterns: &[&str]) -> Self {
        self.content_patterns.extend(patterns.iter().map(|p| p.to_string()));
        self
    }

    /// Header values are matched as case-insensitive regexes. A pattern that fails to
    /// compile is dropped with a warning rather than poisoning the whole table.
    pub fn header(mut self, header: &str, pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(value) => self.header_patterns.push(HeaderPattern {
                header: header.to_ascii_lowercase(),
                value,
            }),
            Err(e) => tracing::warn!(signature = %self.name, header, error = %e, "invalid header pattern"),
        }
        self
    }

    pub fn probes(mut self, paths: &[&str]) -> Self {
        self.probe_paths.extend(paths.iter().map(|p| p.to_string()));
        self
    }

    /// Number of content substrings found in the body plus header expectations met.
    pub fn count_matches(&self, page: &FetchedPage) -> u32 {
        let content = self
            .content_patterns
            .iter()
            .filter(|p| page.body.contains(p.as_str()))
            .count();
        let headers = self
            .header_patterns
            .iter()
            .filter(|hp| page.header(&hp.header).is_some_and(|v| hp.value.is_match(v)))
            .count();
        (content + headers) as u32
    }
}

static DEFAULT_SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    vec![
        Signature::new("WordPress")
            .content(&["wp-content", "wp-includes", "wp-json", "content=\"WordPress"])
            .header("link", r"wp-json")
            .header("x-pingback", r"xmlrpc\.php")
            .probes(&["/wp-login.php", "/xmlrpc.php", "/wp-json/wp/v2/users"]),
        Signature::new("Joomla")
            .content(&["/media/jui/", "Joomla!", "com_content", "/components/com_"])
            .header("x-content-encoded-by", r"joomla")
            .probes(&["/administrator/", "/configuration.php-dist"]),
        Signature::new("Drupal")
            .content(&["Drupal.settings", "/sites/default/files", "drupal.js", "data-drupal-"])
            .header("x-generator", r"drupal")
            .header("x-drupal-cache", r".+")
            .probes(&["/user/login", "/CHANGELOG.txt"]),
        Signature::new("Magento")
            .content(&["Mage.Cookies", "mage/cookies", "/static/version", "Magento_"])
            .header("x-magento-cache-debug", r".+")
            .header("set-cookie", r"frontend=")
            .probes(&["/downloader/", "/app/etc/local.xml"]),
        Signature::new("Shopify")
            .content(&["cdn.shopify.com", "Shopify.theme", "shopify-section"])
            .header("x-shopid", r".+")
            .header("x-shopify-stage", r".+"),
        Signature::new("Wix")
            .content(&["static.wixstatic.com", "wix-code", "_wixCIDX"])
            .header("x-wix-request-id", r".+"),
        Signature::new("Squarespace")
            .content(&["static1.squarespace.com", "Squarespace.Constants"])
            .header("server", r"squarespace"),
        Signature::new("Ghost")
            .content(&["ghost-sdk", "content=\"Ghost", "/ghost/api/"])
            .header("x-ghost-cache-status", r".+")
            .probes(&["/ghost/"]),
        Signature::new("PrestaShop")
            .content(&["var prestashop", "/modules/ps_", "PrestaShop"])
            .header("set-cookie", r"PrestaShop-")
            .header("powered-by", r"prestashop"),
        Signature::new("OpenCart")
            .content(&["catalog/view/theme", "route=common/home"])
            .header("set-cookie", r"OCSESSID")
            .probes(&["/admin/"]),
        Signature::new("Laravel")
            .content(&["laravel", "csrf-token"])
            .header("set-cookie", r"laravel_session")
            .header("set-cookie", r"XSRF-TOKEN")
            .probes(&["/storage/logs/laravel.log"]),
        Signature::new("Django")
            .content(&["csrfmiddlewaretoken", "__admin_media_prefix__"])
            .header("set-cookie", r"csrftoken")
            .probes(&["/admin/login/"]),
        Signature::new("Next.js")
            .content(&["__NEXT_DATA__", "/_next/static/"])
            .header("x-powered-by", r"next\.js")
            .header("x-nextjs-cache", r".+"),
        Signature::new("vBulletin")
            .content(&["vbulletin_", "vBulletin"])
            .header("set-cookie", r"bb_sessionhash")
            .probes(&["/admincp/"]),
        Signature::new("phpBB")
            .content(&["phpBB", "viewforum.php"])
            .header("set-cookie", r"phpbb\d*_")
            .probes(&["/adm/"]),
        Signature::new("MediaWiki")
            .content(&["wgPageName", "mediawiki", "/load.php?"])
            .probes(&["/index.php?title=Special:Version"]),
        Signature::new("Webflow")
            .content(&["data-wf-page", "webflow.js"])
            .header("x-wf-region", r".+"),
    ]
});

/// Built-in platform table, in tie-breaking order.
pub fn default_signatures() -> &'static [Signature] {
    &DEFAULT_SIGNATURES
}

/// Hostname prefixes of hosting control panels; these are labelled without fetching anything.
pub const INFRASTRUCTURE_PREFIXES: &[(&str, &str)] = &[
    ("cpanel.", "cPanel"),
    ("whm.", "cPanel WHM"),
    ("webmail.", "cPanel Webmail"),
    ("webdisk.", "cPanel WebDisk"),
    ("cpcontacts.", "cPanel Contacts"),
    ("cpcalendars.", "cPanel Calendars"),
    ("plesk.", "Plesk"),
];

pub fn infrastructure_label(host: &str) -> Option<&'static str> {
    INFRASTRUCTURE_PREFIXES
        .iter()
        .find(|(prefix, _)| host.starts_with(prefix))
        .map(|(_, label)| *label)
}

/// A sensitive path and the body markers proving it is really exposed.
#[derive(Debug, Clone, Copy)]
pub struct SecurityProbe {
    pub path: &'static str,
    pub markers: &'static [&'static str],
    pub finding: &'static str,
}

impl SecurityProbe {
    pub fn is_hit(&self, body: &str) -> bool {
        self.markers.iter().any(|m| body.contains(m))
    }
}

pub const SECURITY_PROBES: &[SecurityProbe] = &[
    SecurityProbe { path: "/.git/HEAD", markers: &["ref: refs/"], finding: "Exposed Git repository (/.git/HEAD)" },
    SecurityProbe { path: "/.git/config", markers: &["[core]", "repositoryformatversion"], finding: "Exposed Git config (/.git/config)" },
    SecurityProbe { path: "/.env", markers: &["APP_KEY=", "DB_PASSWORD=", "DB_HOST=", "SECRET_KEY="], finding: "Exposed environment file (/.env)" },
    SecurityProbe { path: "/uploads/", markers: &["Index of /", "<title>Index of"], finding: "Directory listing enabled (/uploads/)" },
    SecurityProbe { path: "/phpmyadmin/", markers: &["phpMyAdmin", "pma_username"], finding: "phpMyAdmin exposed (/phpmyadmin/)" },
    SecurityProbe { path: "/server-status", markers: &["Apache Server Status"], finding: "Apache server-status exposed (/server-status)" },
    SecurityProbe { path: "/.DS_Store", markers: &["Bud1"], finding: "Exposed .DS_Store file" },
    SecurityProbe { path: "/wp-config.php.bak", markers: &["DB_PASSWORD", "DB_NAME"], finding: "WordPress config backup exposed (/wp-config.php.bak)" },
];

/// Checked only when no signature matched.
pub const SENSITIVE_PAGES: &[&str] = &["/login", "/admin", "/register", "/wp-login.php", "/user/login"];
