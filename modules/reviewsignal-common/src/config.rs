use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Department, IntentCategory, Thresholds};

const CONFIG_PATH_VAR: &str = "REVIEWSIGNAL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "configs/config.json";

/// Application configuration. Loaded from a JSON file, secrets overlaid from
/// environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scraping_interval_secs: u64,
    pub scrape_timeout_secs: u64,
    pub scrapers: ScrapersConfig,
    pub analyzer: AnalyzerConfig,
    pub router: RouterConfig,
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load from `$REVIEWSIGNAL_CONFIG` (or `configs/config.json`). A missing
    /// file is not an error: defaults are used.
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::from_path(&path)?
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config.with_defaults())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config.with_defaults())
    }

    /// Fill zero-valued durations with their defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.scraping_interval_secs == 0 {
            self.scraping_interval_secs = 3600;
        }
        if self.scrape_timeout_secs == 0 {
            self.scrape_timeout_secs = 600;
        }
        if self.analyzer.max_tokens == 0 {
            self.analyzer.max_tokens = 500;
        }
        self
    }

    pub fn scraping_interval(&self) -> Duration {
        Duration::from_secs(self.scraping_interval_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    /// Secrets never live in the config file in production.
    pub fn apply_env_overrides(&mut self) {
        let twitter = &mut self.scrapers.twitter;
        override_from_env(&mut twitter.api_key, "TWITTER_API_KEY");
        override_from_env(&mut twitter.api_secret, "TWITTER_API_SECRET");
        override_from_env(&mut twitter.access_token, "TWITTER_ACCESS_TOKEN");
        override_from_env(&mut twitter.access_secret, "TWITTER_ACCESS_SECRET");
        override_from_env(&mut self.scrapers.g2.api_token, "G2_API_TOKEN");
        match self.analyzer.mode() {
            AnalyzerMode::AzureOpenAi => {
                override_from_env(&mut self.analyzer.api_key, "AZURE_OPENAI_API_KEY")
            }
            _ => override_from_env(&mut self.analyzer.api_key, "OPENAI_API_KEY"),
        }
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        let s = &self.scrapers;
        info!(
            interval_secs = self.scraping_interval_secs,
            timeout_secs = self.scrape_timeout_secs,
            twitter = s.twitter.enabled,
            twitter_keywords = s.twitter.keywords.len(),
            twitter_credentials = redact(&s.twitter.api_key),
            g2 = s.g2.enabled,
            g2_product = s.g2.product_id.as_str(),
            trustpilot = s.trustpilot.enabled,
            trustpilot_business = s.trustpilot.business_id.as_str(),
            proxy = s.proxy.enabled,
            "Scraper configuration"
        );
        info!(
            mode = self.analyzer.mode.as_str(),
            api_key = redact(&self.analyzer.api_key),
            negative_threshold = self.analyzer.negative_threshold,
            relevance_threshold = self.analyzer.relevance_threshold,
            default_department = self.router.default_department.as_str(),
            mappings = self.router.mappings.len(),
            "Analyzer and router configuration"
        );
    }
}

fn override_from_env(field: &mut String, key: &str) {
    if let Ok(value) = env::var(key) {
        if !value.is_empty() {
            *field = value;
        }
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

// --- Scrapers ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapersConfig {
    pub twitter: TwitterConfig,
    pub g2: G2Config,
    pub trustpilot: TrustpilotConfig,
    pub rate_limits: RateLimitConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TwitterConfig {
    pub enabled: bool,
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_secret: String,
    pub keywords: Vec<String>,
    pub exclude_words: Vec<String>,
    pub max_results: u32,
    pub base_url: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            api_secret: String::new(),
            access_token: String::new(),
            access_secret: String::new(),
            keywords: Vec::new(),
            exclude_words: Vec::new(),
            max_results: 100,
            base_url: "https://api.twitter.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct G2Config {
    pub enabled: bool,
    pub product_id: String,
    pub api_token: String,
    pub max_pages: u32,
    pub base_url: String,
}

impl Default for G2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            product_id: String::new(),
            api_token: String::new(),
            max_pages: 5,
            base_url: "https://www.g2.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrustpilotConfig {
    pub enabled: bool,
    pub business_id: String,
    pub max_pages: u32,
    pub base_url: String,
}

impl Default for TrustpilotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            business_id: String::new(),
            max_pages: 5,
            base_url: "https://www.trustpilot.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Upper bound on request rate; 0 disables the bound.
    pub requests_per_minute: u32,
    /// Take an extra pause after every N requests; 0 disables it.
    pub pause_after_requests: u32,
    pub pause_duration_ms: u64,
    pub pause_between_requests: bool,
    pub randomize_user_agents: bool,
    pub randomize_pause_times: bool,
}

impl RateLimitConfig {
    pub fn pause_duration(&self) -> Duration {
        Duration::from_millis(self.pause_duration_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub url: String,
    pub urls: Vec<String>,
    pub username: String,
    pub password: String,
    pub rotate: bool,
}

// --- Analyzer ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerMode {
    Local,
    OpenAi,
    AzureOpenAi,
}

impl AnalyzerMode {
    /// Unknown or empty names select the local heuristic.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => AnalyzerMode::OpenAi,
            "azure" | "azure_openai" => AnalyzerMode::AzureOpenAi,
            _ => AnalyzerMode::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerMode::Local => "local",
            AnalyzerMode::OpenAi => "openai",
            AnalyzerMode::AzureOpenAi => "azure_openai",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzerConfig {
    pub mode: String,
    /// Chat-completion endpoint. For Azure this is the resource URL.
    pub model_endpoint: String,
    pub model: String,
    pub api_key: String,
    pub azure_deployment: String,
    pub azure_api_version: String,
    /// Reply token budget for remote strategies.
    pub max_tokens: u32,
    pub negative_threshold: f64,
    pub relevance_threshold: f64,
    /// Extra relevance keywords scanned on top of the category table.
    pub keywords: Vec<String>,
    pub category_keywords: BTreeMap<String, IntentCategory>,
    pub product_terms: Vec<String>,
    pub generic_terms: Vec<String>,
}

impl AnalyzerConfig {
    pub fn mode(&self) -> AnalyzerMode {
        AnalyzerMode::from_name(&self.mode)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            negative: self.negative_threshold,
            relevance: self.relevance_threshold,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            mode: "local".to_string(),
            model_endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            azure_deployment: String::new(),
            azure_api_version: "2024-02-15-preview".to_string(),
            max_tokens: 500,
            negative_threshold: thresholds.negative,
            relevance_threshold: thresholds.relevance,
            keywords: Vec::new(),
            category_keywords: default_category_keywords(),
            product_terms: to_strings(&[
                "infoblox",
                "bloxone",
                "nios",
                "ddi",
                "dhcp",
                "dns",
                "ipam",
                "netmri",
                "threat defense",
                "dns firewall",
                "cloud network automation",
            ]),
            generic_terms: to_strings(&[
                "app",
                "website",
                "service",
                "product",
                "interface",
                "platform",
                "system",
            ]),
        }
    }
}

pub fn default_category_keywords() -> BTreeMap<String, IntentCategory> {
    use IntentCategory::*;
    [
        ("bug", BugReport),
        ("crash", BugReport),
        ("error", BugReport),
        ("broken", BugReport),
        ("freeze", BugReport),
        ("slow", Performance),
        ("laggy", Performance),
        ("hang", Performance),
        ("latency", Performance),
        ("feature", FeatureRequest),
        ("missing", FeatureRequest),
        ("wish", FeatureRequest),
        ("delivery", Logistics),
        ("shipping", Logistics),
        ("payment", Billing),
        ("charge", Billing),
        ("refund", Billing),
        ("license", Billing),
        ("support", CustomerService),
        ("service", CustomerService),
        ("rude", CustomerService),
        ("interface", UiUx),
        ("confusing", UiUx),
        ("difficult", UiUx),
        ("threat", Security),
        ("secure", Security),
        ("protection", Security),
        ("ddos", Security),
        ("vulnerability", Security),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// --- Router ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentMapping {
    pub category: IntentCategory,
    pub department: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    pub mappings: Vec<DepartmentMapping>,
    pub departments: Vec<Department>,
    pub default_department: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            departments: Vec::new(),
            default_department: Department::TERMINAL_ID.to_string(),
        }
    }
}

pub fn default_mappings() -> Vec<DepartmentMapping> {
    use IntentCategory::*;
    [
        (BugReport, "engineering", 10),
        (Security, "security", 10),
        (Billing, "finance", 9),
        (Performance, "engineering", 8),
        (Logistics, "operations", 7),
        (UiUx, "design", 7),
        (CustomerService, "support", 6),
        (GeneralComplaint, "support", 6),
        (FeatureRequest, "product", 5),
    ]
    .into_iter()
    .map(|(category, department, priority)| DepartmentMapping {
        category,
        department: department.to_string(),
        priority,
    })
    .collect()
}

pub fn default_departments() -> Vec<Department> {
    use IntentCategory::*;
    let dept = |id: &str, name: &str, contact: &str, categories: Vec<IntentCategory>| Department {
        id: id.to_string(),
        name: name.to_string(),
        contact_info: contact.to_string(),
        categories,
    };
    vec![
        dept(
            "engineering",
            "Engineering",
            "engineering@company.com",
            vec![BugReport, Performance],
        ),
        dept("security", "Security Team", "security@company.com", vec![Security]),
        dept("product", "Product Management", "product@company.com", vec![FeatureRequest]),
        dept("design", "UX Design", "design@company.com", vec![UiUx]),
        dept("finance", "Billing & Licensing", "billing@company.com", vec![Billing]),
        dept("operations", "Operations", "operations@company.com", vec![Logistics]),
        dept(
            "support",
            "Technical Support",
            "support@company.com",
            vec![CustomerService, GeneralComplaint],
        ),
    ]
}

// --- Notifier ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifierConfig {
    /// Emit one log line per routed review.
    pub log_enabled: bool,
    /// Size of the recent-review buffer exposed to the API layer.
    pub recent_reviews: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            log_enabled: true,
            recent_reviews: 100,
        }
    }
}
