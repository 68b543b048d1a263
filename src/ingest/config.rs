// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PATH: &str = "FEEDS_CONFIG_PATH";

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    "general".to_string()
}

/// One RSS/Atom endpoint. Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Sources, category rules, priority keywords and image allow-list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedsConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub priority_keywords: Vec<String>,
    #[serde(default)]
    pub trusted_image_domains: Vec<String>,
}

impl FeedsConfig {
    /// Enabled sources, priority sources first, otherwise in configured order.
    pub fn enabled_sources(&self) -> Vec<SourceConfig> {
        let mut out: Vec<SourceConfig> =
            self.sources.iter().filter(|s| s.enabled).cloned().collect();
        out.sort_by_key(|s| !s.priority);
        out
    }

    /// Trim everything, drop blank entries, keep the first of duplicate ids.
    pub fn cleaned(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.sources.retain(|s| {
            !s.id.trim().is_empty() && !s.url.trim().is_empty() && seen.insert(s.id.trim().to_string())
        });
        for s in &mut self.sources {
            s.id = s.id.trim().to_string();
            s.url = s.url.trim().to_string();
            if s.name.trim().is_empty() {
                s.name = s.id.clone();
            }
        }

        let mut seen = std::collections::HashSet::new();
        self.categories
            .retain(|c| !c.id.trim().is_empty() && seen.insert(c.id.trim().to_string()));
        for c in &mut self.categories {
            c.id = c.id.trim().to_string();
            c.keywords = clean_list(std::mem::take(&mut c.keywords));
            if c.name.trim().is_empty() {
                c.name = c.id.clone();
            }
        }
        self.priority_keywords = clean_list(std::mem::take(&mut self.priority_keywords));
        self.trusted_image_domains = clean_list(std::mem::take(&mut self.trusted_image_domains));
        self
    }

    /// Built-in configuration used when no file is present.
    pub fn default_seed() -> Self {
        let src = |id: &str, name: &str, url: &str, category: &str, priority: bool| SourceConfig {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            category: category.to_string(),
            enabled: true,
            priority,
        };
        let cat = |id: &str, name: &str, kws: &[&str]| CategoryConfig {
            id: id.to_string(),
            name: name.to_string(),
            keywords: kws.iter().map(|k| k.to_string()).collect(),
        };
        let list = |xs: &[&str]| xs.iter().map(|x| x.to_string()).collect::<Vec<_>>();

        Self {
            sources: vec![
                src("herald", "The Herald", "https://www.herald.co.zw/feed/", "general", true),
                src("newsday", "NewsDay", "https://www.newsday.co.zw/feed/", "general", true),
                src("chronicle", "The Chronicle", "https://www.chronicle.co.zw/feed/", "general", false),
                src("zbc", "ZBC News", "https://www.zbcnews.co.zw/feed/", "general", false),
                src("zimlive", "ZimLive", "https://www.zimlive.com/feed/", "general", false),
                src("newzimbabwe", "New Zimbabwe", "https://www.newzimbabwe.com/feed/", "general", false),
                src("nehanda", "Nehanda Radio", "https://nehandaradio.com/feed/", "general", false),
                src("bulawayo24", "Bulawayo24", "https://bulawayo24.com/rss.php", "general", false),
                src("thestandard", "The Standard", "https://www.thestandard.co.zw/feed/", "general", false),
                src("zimind", "Zimbabwe Independent", "https://www.theindependent.co.zw/feed/", "business", false),
                src("techzim", "Techzim", "https://www.techzim.co.zw/feed/", "technology", false),
                src("soccer24", "Soccer24", "https://www.soccer24.co.zw/feed/", "sports", false),
            ],
            categories: vec![
                cat("politics", "Politics", &[
                    "parliament", "minister", "zanu", "ccc", "opposition", "cabinet",
                    "government", "senate", "policy", "constitution",
                ]),
                cat("economy", "Economy", &[
                    "budget", "inflation", "zig", "exchange rate", "reserve bank", "rbz",
                    "economy", "gdp", "currency", "treasury", "fiscal",
                ]),
                cat("business", "Business", &[
                    "business", "company", "market", "investment", "mining", "stock exchange",
                    "zse", "tobacco", "trade", "revenue", "profit",
                ]),
                cat("sports", "Sports", &[
                    "football", "soccer", "cricket", "rugby", "warriors", "chevrons",
                    "psl", "athletics", "match", "tournament", "coach",
                ]),
                cat("technology", "Technology", &[
                    "technology", "tech", "digital", "internet", "econet", "netone",
                    "ecocash", "startup", "mobile", "software", "cyber",
                ]),
                cat("health", "Health", &[
                    "health", "hospital", "cholera", "doctor", "nurse", "disease",
                    "vaccine", "clinic", "medical", "malaria",
                ]),
                cat("education", "Education", &[
                    "school", "university", "student", "teacher", "education", "zimsec",
                    "exam", "college",
                ]),
                cat("entertainment", "Entertainment", &[
                    "music", "artist", "film", "entertainment", "celebrity", "album",
                    "concert", "festival",
                ]),
                cat("agriculture", "Agriculture", &[
                    "farm", "farmer", "agriculture", "maize", "harvest", "drought",
                    "crop", "livestock",
                ]),
            ],
            priority_keywords: list(&[
                "breaking", "urgent", "emergency", "budget", "election", "cholera",
                "cyclone", "drought", "president", "mnangagwa", "reserve bank", "fuel",
            ]),
            trusted_image_domains: list(&[
                "herald.co.zw", "newsday.co.zw", "chronicle.co.zw", "zbcnews.co.zw",
                "zimlive.com", "newzimbabwe.com", "nehandaradio.com", "bulawayo24.com",
                "thestandard.co.zw", "theindependent.co.zw", "techzim.co.zw",
                "soccer24.co.zw", "wp.com", "wordpress.com",
            ]),
        }
    }
}

/// Load feed configuration from an explicit path. Supports TOML or JSON formats.
pub fn load_feeds_from(path: &Path) -> Result<FeedsConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feeds config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_feeds(&content, ext.as_str())
        .with_context(|| format!("parsing feeds config {}", path.display()))
}

/// Load feed configuration using env var + fallbacks:
/// 1) $FEEDS_CONFIG_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in seed
pub fn load_feeds_default() -> Result<FeedsConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_feeds_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_feeds_from(&json_p);
    }
    Ok(FeedsConfig::default_seed())
}

pub fn parse_feeds(s: &str, hint_ext: &str) -> Result<FeedsConfig> {
    let try_toml = hint_ext == "toml" || !s.trim_start().starts_with('{');
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported feeds config format"))
}

fn parse_toml(s: &str) -> Result<FeedsConfig> {
    let v: FeedsConfig = toml::from_str(s)?;
    Ok(v.cleaned())
}

fn parse_json(s: &str) -> Result<FeedsConfig> {
    let v: FeedsConfig = serde_json::from_str(s)?;
    Ok(v.cleaned())
}

/// Trimmed, non-empty, first occurrence wins. Order is kept: it decides ties.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_are_cleaned() {
        let toml = r#"
            priority_keywords = [" budget ", "", "budget", "cholera"]
            trusted_image_domains = ["herald.co.zw"]

            [[sources]]
            id = "herald"
            name = "The Herald"
            url = " https://www.herald.co.zw/feed/ "

            [[sources]]
            id = "herald"
            name = "Duplicate"
            url = "https://example.com/feed"

            [[sources]]
            id = "blank"
            name = ""
            url = ""

            [[categories]]
            id = "economy"
            keywords = ["budget", " ZiG "]
        "#;
        let cfg = parse_feeds(toml, "toml").unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].url, "https://www.herald.co.zw/feed/");
        assert!(cfg.sources[0].enabled);
        assert_eq!(cfg.sources[0].category, "general");
        assert_eq!(cfg.priority_keywords, vec!["budget", "cholera"]);
        assert_eq!(cfg.categories[0].name, "economy");
        assert_eq!(cfg.categories[0].keywords, vec!["budget", "ZiG"]);

        let json = r#"{"sources":[{"id":"zbc","name":"ZBC","url":"https://zbc/feed","enabled":false}]}"#;
        let cfg = parse_feeds(json, "json").unwrap();
        assert!(!cfg.sources[0].enabled);
        assert!(cfg.enabled_sources().is_empty());

        assert!(parse_feeds("{ not json", "json").is_err());
    }

    #[test]
    fn priority_sources_come_first() {
        let mut cfg = FeedsConfig::default_seed();
        cfg.sources.reverse();
        let ids: Vec<String> = cfg.enabled_sources().into_iter().map(|s| s.id).collect();
        assert_eq!(&ids[..2], &["newsday".to_string(), "herald".to_string()]);
        assert_eq!(ids.last().map(String::as_str), Some("chronicle"));
    }

    #[test]
    fn seed_covers_core_keywords() {
        let cfg = FeedsConfig::default_seed();
        let econ = cfg.categories.iter().find(|c| c.id == "economy").unwrap();
        assert!(econ.keywords.iter().any(|k| k == "budget"));
        assert!(cfg.priority_keywords.iter().any(|k| k == "budget"));
        let sports = cfg.categories.iter().find(|c| c.id == "sports").unwrap();
        assert!(sports.keywords.iter().any(|k| k == "football"));
        assert!(cfg.trusted_image_domains.iter().any(|d| d == "herald.co.zw"));
        assert_eq!(cfg.clone().cleaned(), cfg);
    }
}
