// src/ingest/classify.rs
//! Keyword classifier: category, priority flag, 0–10 relevance, keyword list.
//! All matching is case-insensitive substring matching on lowercased text.

use crate::ingest::config::FeedsConfig;
use crate::ingest::types::CATCH_ALL_CATEGORY;

pub const MAX_RELEVANCE: u8 = 10;
pub const MAX_KEYWORDS: usize = 5;
const TITLE_BONUS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub priority: bool,
    pub relevance_score: u8,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
struct CategoryRule {
    id: String,
    keywords: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: Vec<CategoryRule>,
    priority: Vec<String>,
}

fn clean_list<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for it in items {
        let k = it.as_ref().trim().to_lowercase();
        if !k.is_empty() && !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

fn occurrences(haystack: &str, needle: &str) -> u32 {
    haystack.matches(needle).count() as u32
}

impl Classifier {
    /// `categories` keeps its order: it decides ties.
    pub fn new<S: AsRef<str>>(categories: Vec<(String, Vec<S>)>, priority: Vec<S>) -> Self {
        let rules = categories
            .into_iter()
            .filter(|(id, _)| !id.trim().is_empty() && id != CATCH_ALL_CATEGORY)
            .map(|(id, kws)| CategoryRule {
                id,
                keywords: clean_list(kws),
            })
            .collect();
        Self {
            rules,
            priority: clean_list(priority),
        }
    }

    pub fn from_config(cfg: &FeedsConfig) -> Self {
        let categories = cfg
            .categories
            .iter()
            .map(|c| (c.id.clone(), c.keywords.clone()))
            .collect();
        Self::new(categories, cfg.priority_keywords.clone())
    }

    /// Strict maximum of keyword occurrences; ties keep the earlier category.
    pub fn detect_category(&self, text_lc: &str) -> &str {
        let mut best: Option<(&str, u32)> = None;
        for rule in &self.rules {
            let hits: u32 = rule.keywords.iter().map(|k| occurrences(text_lc, k)).sum();
            if hits > best.map(|(_, h)| h).unwrap_or(0) {
                best = Some((rule.id.as_str(), hits));
            }
        }
        best.map(|(id, _)| id).unwrap_or(CATCH_ALL_CATEGORY)
    }

    pub fn is_priority(&self, text_lc: &str) -> bool {
        self.priority.iter().any(|k| text_lc.contains(k.as_str()))
    }

    /// +1 per priority-keyword occurrence, +3 when that keyword is also in the
    /// title; capped at [`MAX_RELEVANCE`].
    pub fn relevance_score(&self, text_lc: &str, title_lc: &str) -> u8 {
        let mut score: u32 = 0;
        for k in &self.priority {
            let n = occurrences(text_lc, k);
            if n == 0 {
                continue;
            }
            score += n;
            if title_lc.contains(k.as_str()) {
                score += TITLE_BONUS;
            }
        }
        score.min(MAX_RELEVANCE as u32) as u8
    }

    /// Priority keywords first, then longer matches first; at most five.
    pub fn extract_keywords(&self, text_lc: &str, category: &str) -> Vec<String> {
        let category_kws = self
            .rules
            .iter()
            .find(|r| r.id == category)
            .map(|r| r.keywords.as_slice())
            .unwrap_or(&[]);

        let mut found: Vec<(bool, &str)> = Vec::new();
        for k in category_kws.iter().chain(self.priority.iter()) {
            if !text_lc.contains(k.as_str()) || found.iter().any(|(_, f)| f == k) {
                continue;
            }
            found.push((self.priority.contains(k), k.as_str()));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.len().cmp(&a.1.len())));
        found
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(_, k)| k.to_string())
            .collect()
    }

    pub fn classify(&self, text: &str, title: &str) -> Classification {
        let text_lc = text.to_lowercase();
        let title_lc = title.to_lowercase();
        let category = self.detect_category(&text_lc).to_string();
        Classification {
            priority: self.is_priority(&text_lc),
            relevance_score: self.relevance_score(&text_lc, &title_lc),
            keywords: self.extract_keywords(&text_lc, &category),
            category,
        }
    }
}
