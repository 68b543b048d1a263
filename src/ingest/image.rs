// src/ingest/image.rs
//! Best-image selection for a feed item.
//!
//! Candidates are gathered in a fixed priority order, resolved against the
//! item link, and then filtered against the trusted-domain allow-list. Only a
//! trusted candidate is ever returned, even if an untrusted one was the sole
//! image found.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::ingest::types::RawItem;

static RE_IMG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap());
static RE_OG_PROP_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*?property\s*=\s*["']og:image["'][^>]*?content\s*=\s*["']([^"']+)["']"#)
        .unwrap()
});
static RE_OG_CONTENT_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*?content\s*=\s*["']([^"']+)["'][^>]*?property\s*=\s*["']og:image["']"#)
        .unwrap()
});
static RE_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:https?:)?//[^\s"'<>()]+?\.(?:jpe?g|png|gif|webp|avif)\b(?:\?[^\s"'<>()]*)?"#)
        .unwrap()
});

/// Hostname suffixes images may be served from.
#[derive(Debug, Clone, Default)]
pub struct TrustedDomains {
    domains: Vec<String>,
}

impl TrustedDomains {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| {
                d.as_ref()
                    .trim()
                    .trim_start_matches("*.")
                    .trim_start_matches('.')
                    .to_ascii_lowercase()
            })
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    /// Exact host or any subdomain of a trusted entry.
    pub fn is_trusted_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domains.iter().any(|d| {
            host == *d
                || (host.len() > d.len()
                    && host.ends_with(d.as_str())
                    && host.as_bytes()[host.len() - d.len() - 1] == b'.')
        })
    }

    pub fn is_trusted_url(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| self.is_trusted_host(h)))
            .unwrap_or(false)
    }
}

/// Candidate URLs in priority order, unresolved.
pub fn candidates(item: &RawItem) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    out.extend(item.media_images.iter().cloned());
    out.extend(item.enclosure_images.iter().cloned());
    out.extend(item.image.iter().cloned());
    out.extend(item.platform_images.iter().cloned());

    let bodies: Vec<&str> = [item.content.as_deref(), item.description.as_deref()]
        .into_iter()
        .flatten()
        .collect();

    for body in &bodies {
        out.extend(RE_IMG.captures_iter(body).map(|c| c[1].to_string()));
    }
    for body in &bodies {
        for re in [&*RE_OG_PROP_FIRST, &*RE_OG_CONTENT_FIRST] {
            out.extend(re.captures_iter(body).map(|c| c[1].to_string()));
        }
    }
    for body in &bodies {
        out.extend(RE_BARE.find_iter(body).map(|m| m.as_str().to_string()));
    }
    out
}

/// Resolve protocol-relative, root-relative and relative URLs against `base`.
pub fn resolve(candidate: &str, base: &str) -> Option<String> {
    let c = html_escape::decode_html_entities(candidate.trim()).to_string();
    if c.is_empty() || c.starts_with("data:") {
        return None;
    }
    let resolved = match Url::parse(&c) {
        Ok(u) => u,
        Err(_) => Url::parse(base).ok()?.join(&c).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// First trusted candidate, or `None`.
pub fn extract_image_url(item: &RawItem, link: &str, trusted: &TrustedDomains) -> Option<String> {
    candidates(item)
        .iter()
        .filter_map(|c| resolve(c, link))
        .find(|u| trusted.is_trusted_url(u))
}
