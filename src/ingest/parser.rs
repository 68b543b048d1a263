// src/ingest/parser.rs
//! Streaming RSS 2.0 / RSS 1.0 / Atom parser.
//!
//! The output is always the canonical [`RawItem`] shape: text nodes and
//! attribute-carried values (`<link href>`, `<media:content url>`, ...) are
//! folded into the same fields here, so nothing downstream has to care how a
//! particular feed spelled them. Markup inside text fields is preserved for
//! the image extractor; cleaning happens in `normalize`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::ingest::types::RawItem;

/// Anything shorter cannot be a feed with at least one item.
pub const MIN_FEED_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("feed body too short ({0} bytes)")]
    TooShort(usize),
    #[error("document is not an RSS/Atom feed")]
    NotAFeed,
    #[error("malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },
}

struct ItemBuilder {
    item: RawItem,
    updated: Option<String>,
    depth: usize,
}

impl ItemBuilder {
    fn finish(self) -> RawItem {
        let mut item = self.item;
        if item.pub_date.is_none() {
            item.pub_date = self.updated;
        }
        item
    }
}

struct Capture {
    name: String,
    depth: usize,
    buf: String,
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn is_feed_root(name: &str) -> bool {
    matches!(local(name), "rss" | "feed" | "RDF" | "channel")
}

fn qname(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attrs(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&a.value);
            let value = html_escape::decode_html_entities(&raw).trim().to_string();
            (key, value)
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key || local(k) == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn set_once(slot: &mut Option<String>, value: &str) {
    let v = value.trim();
    if slot.is_none() && !v.is_empty() {
        *slot = Some(v.to_string());
    }
}

/// Elements whose payload lives in attributes.
fn apply_attrs(b: &mut ItemBuilder, name: &str, attrs: &[(String, String)]) {
    let mime = attr(attrs, "type").unwrap_or_default().to_ascii_lowercase();
    match name {
        "media:content" => {
            let medium = attr(attrs, "medium").unwrap_or_default();
            if medium.eq_ignore_ascii_case("image") || mime.starts_with("image/") {
                if let Some(u) = attr(attrs, "url") {
                    b.item.media_images.push(u.to_string());
                }
            }
        }
        "media:thumbnail" => {
            if let Some(u) = attr(attrs, "url") {
                b.item.platform_images.push(u.to_string());
            }
        }
        "itunes:image" => {
            if let Some(u) = attr(attrs, "href") {
                b.item.platform_images.push(u.to_string());
            }
        }
        "enclosure" => {
            if mime.starts_with("image/") {
                if let Some(u) = attr(attrs, "url") {
                    b.item.enclosure_images.push(u.to_string());
                }
            }
        }
        _ if local(name) == "link" => {
            let Some(href) = attr(attrs, "href") else {
                return;
            };
            match attr(attrs, "rel").unwrap_or("alternate") {
                "alternate" => set_once(&mut b.item.link, href),
                "enclosure" if mime.starts_with("image/") => {
                    b.item.enclosure_images.push(href.to_string())
                }
                _ => {}
            }
        }
        _ => {}
    }
}

/// Elements whose payload is their text content.
fn apply_text(b: &mut ItemBuilder, name: &str, text: &str) {
    match name {
        "content:encoded" => set_once(&mut b.item.content, text),
        "dc:date" => set_once(&mut b.item.pub_date, text),
        "wp:featured_image" | "featured_image" | "featuredImage" | "post-thumbnail" => {
            let t = text.trim();
            if !t.is_empty() {
                b.item.platform_images.push(t.to_string());
            }
        }
        n if n.starts_with("media:") || n.starts_with("itunes:") => {}
        n => match local(n) {
            "title" => set_once(&mut b.item.title, text),
            "link" => set_once(&mut b.item.link, text),
            "description" | "summary" => set_once(&mut b.item.description, text),
            "content" => set_once(&mut b.item.content, text),
            "pubDate" | "published" | "issued" => set_once(&mut b.item.pub_date, text),
            "updated" | "modified" => set_once(&mut b.updated, text),
            "guid" | "id" => set_once(&mut b.item.guid, text),
            "image" => set_once(&mut b.item.image, text),
            _ => {}
        },
    }
}

/// Parse a feed document into raw items. Malformed XML after at least one
/// complete item yields the items parsed so far.
pub fn parse(body: &str) -> Result<Vec<RawItem>, ParseError> {
    let xml = body.trim_start_matches('\u{feff}').trim();
    if xml.len() < MIN_FEED_BYTES {
        return Err(ParseError::TooShort(xml.len()));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = false;

    let mut items: Vec<RawItem> = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<Capture> = None;

    loop {
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) => {
                if items.is_empty() {
                    return Err(ParseError::Xml {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    });
                }
                tracing::debug!(target: "ingest", error = %e, kept = items.len(), "truncated feed, keeping parsed items");
                break;
            }
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = qname(e);
                saw_root |= is_feed_root(&name);

                match current.as_mut() {
                    None if matches!(local(&name), "item" | "entry") => {
                        if !is_empty {
                            current = Some(ItemBuilder {
                                item: RawItem::default(),
                                updated: None,
                                depth: stack.len(),
                            });
                        }
                    }
                    None => {}
                    Some(b) => {
                        let a = attrs(e);
                        apply_attrs(b, &name, &a);
                        match field.as_mut() {
                            // nested markup inside a field (Atom xhtml content)
                            Some(cap) => {
                                if local(&name) == "img" {
                                    if let Some(src) = attr(&a, "src") {
                                        cap.buf.push_str(&format!(" <img src=\"{src}\"> "));
                                    }
                                }
                            }
                            None if stack.len() == b.depth + 1 && !is_empty => {
                                field = Some(Capture {
                                    name: name.clone(),
                                    depth: stack.len() + 1,
                                    buf: String::new(),
                                });
                            }
                            None => {}
                        }
                    }
                }

                if !is_empty {
                    stack.push(name);
                }
            }
            Event::Text(ref t) => {
                if let Some(cap) = field.as_mut() {
                    let raw = String::from_utf8_lossy(t);
                    cap.buf.push_str(&html_escape::decode_html_entities(&raw));
                }
            }
            Event::CData(ref c) => {
                if let Some(cap) = field.as_mut() {
                    cap.buf.push_str(&String::from_utf8_lossy(c));
                }
            }
            Event::End(_) => {
                if field.as_ref().is_some_and(|cap| cap.depth == stack.len()) {
                    if let (Some(cap), Some(b)) = (field.take(), current.as_mut()) {
                        apply_text(b, &cap.name, &cap.buf);
                    }
                }
                stack.pop();
                if current.as_ref().is_some_and(|b| b.depth == stack.len()) {
                    if let Some(b) = current.take() {
                        items.push(b.finish());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root && items.is_empty() {
        return Err(ParseError::NotAFeed);
    }
    Ok(items)
}
