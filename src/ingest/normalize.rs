// src/ingest/normalize.rs
//! Text cleaning and the RawItem -> Article step.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::classify::Classifier;
use crate::ingest::config::SourceConfig;
use crate::ingest::image::{self, TrustedDomains};
use crate::ingest::types::{Article, RawItem};

pub const MIN_TITLE_CHARS: usize = 10;
pub const EXCERPT_CHARS: usize = 300;

static RE_BLOCKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[a-z!][^>]*>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Decode entities, strip markup, normalize quotes and whitespace.
pub fn clean_text(s: &str) -> String {
    // 1) Entities. Feeds often double-escape (`&amp;#8217;`), so decode twice.
    let once = html_escape::decode_html_entities(s);
    let mut out = html_escape::decode_html_entities(&once).to_string();

    // 2) Drop script/style bodies, then any remaining tags
    out = RE_BLOCKS.replace_all(&out, " ").to_string();
    out = RE_TAGS.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes, nbsp to space
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    // 4) Collapse whitespace
    out = RE_WS.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Bounded excerpt for list views, cut on a word boundary.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if cut[..idx].chars().count() > max_chars / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!(
        "{}...",
        trimmed.trim_end_matches(|c: char| c.is_whitespace() || c == ',' || c == ';')
    )
}

/// Dedup key: lowercase, punctuation stripped, whitespace collapsed.
pub fn title_key(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// RFC 2822 (RSS), RFC 3339 (Atom), then chrono's lenient RFC 2822.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let parsed = OffsetDateTime::parse(s, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(s, &Rfc3339))
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond()));
    parsed.or_else(|| {
        DateTime::parse_from_rfc2822(s)
            .or_else(|_| DateTime::parse_from_rfc3339(s))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn absolute_http_url(candidate: &str) -> Option<String> {
    let u = url::Url::parse(candidate.trim()).ok()?;
    matches!(u.scheme(), "http" | "https").then(|| u.to_string())
}

/// Build the proxied form of an image URL.
pub fn optimized_image_url(proxy_base: &str, image_url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(image_url.as_bytes()).collect();
    let sep = if proxy_base.contains('?') { '&' } else { '?' };
    format!("{proxy_base}{sep}url={encoded}&w=800&q=80")
}

/// Everything the normalizer needs besides the item itself.
pub struct NormalizeCtx<'a> {
    pub source: &'a SourceConfig,
    pub classifier: &'a Classifier,
    pub trusted: &'a TrustedDomains,
    pub image_proxy_base: &'a str,
    pub now: DateTime<Utc>,
}

/// Returns `None` for items that fail minimal validity (title/link).
pub fn normalize_item(raw: &RawItem, ctx: &NormalizeCtx<'_>) -> Option<Article> {
    let title = clean_text(raw.title.as_deref().unwrap_or_default());
    if title.chars().count() < MIN_TITLE_CHARS {
        return None;
    }

    let link = raw
        .link
        .as_deref()
        .and_then(absolute_http_url)
        .or_else(|| raw.guid.as_deref().and_then(absolute_http_url))?;

    let description_plain = clean_text(raw.description.as_deref().unwrap_or_default());
    let content_plain = raw
        .content
        .as_deref()
        .map(clean_text)
        .filter(|c| !c.is_empty());
    let full_content = content_plain.unwrap_or_else(|| description_plain.clone());
    let summary_source = if description_plain.is_empty() {
        &full_content
    } else {
        &description_plain
    };
    let description = excerpt(summary_source, EXCERPT_CHARS);

    let text = format!("{title} {summary_source}");
    let class = ctx.classifier.classify(&text, &title);

    let pub_date = raw
        .pub_date
        .as_deref()
        .and_then(parse_pub_date)
        .unwrap_or(ctx.now);

    let guid = raw
        .guid
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "{}-{}-{:08x}",
                ctx.source.id,
                ctx.now.timestamp_millis(),
                rand::random::<u32>()
            )
        });

    let image_url = image::extract_image_url(raw, &link, ctx.trusted);
    let optimized_image_url = image_url
        .as_deref()
        .map(|u| optimized_image_url(ctx.image_proxy_base, u));

    Some(Article {
        has_full_content: full_content.chars().count() > EXCERPT_CHARS,
        word_count: full_content.split_whitespace().count(),
        title,
        link,
        description,
        full_content,
        pub_date,
        source: ctx.source.name.clone(),
        source_id: ctx.source.id.clone(),
        category: class.category,
        priority: class.priority,
        relevance_score: class.relevance_score,
        keywords: class.keywords,
        guid,
        image_url,
        optimized_image_url,
    })
}
