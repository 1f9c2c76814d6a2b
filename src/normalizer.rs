use crate::types::{CandidateItem, IngestError, NormalizedBatch, Result, Source};
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, MediaObject};
use feed_rs::parser;
use tracing::{debug, info};

const SUMMARY_MAX_CHARS: usize = 200;

const SENTENCE_ENDINGS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Turns one feed document (RSS or Atom, same path for both) into candidate
/// items plus per-item error strings. A single bad item never fails the
/// batch; an unparsable document does.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedNormalizer;

impl FeedNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(
        &self,
        source: &Source,
        raw: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<NormalizedBatch> {
        debug!("Parsing feed content ({} bytes)", raw.len());

        let feed = parser::parse(raw.as_bytes())
            .map_err(|e| IngestError::Parse(format!("Failed to parse feed: {}", e)))?;

        let feed_title = feed
            .title
            .as_ref()
            .map(|t| t.content.as_str())
            .filter(|t| !t.is_empty());

        let mut batch = NormalizedBatch::default();
        for entry in &feed.entries {
            match normalize_entry(entry, feed_title, source, fetched_at) {
                Ok(item) => batch.candidates.push(item),
                Err(reason) => batch.errors.push(reason),
            }
        }

        info!(
            "Normalized feed for source {}: {} candidates, {} rejected",
            source.name,
            batch.candidates.len(),
            batch.errors.len()
        );

        Ok(batch)
    }
}

fn normalize_entry(
    entry: &Entry,
    feed_title: Option<&str>,
    source: &Source,
    fetched_at: DateTime<Utc>,
) -> std::result::Result<CandidateItem, String> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    // No link means no dedup key: reject this item, keep the batch going.
    // A blank href counts as missing.
    let link = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
        .ok_or_else(|| format!("Missing link for entry \"{}\"", title))?;

    let explicit_summary = entry.summary.as_ref().map(|s| s.content.clone());

    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| explicit_summary.clone());

    let summary = derive_summary(explicit_summary.as_deref(), content.as_deref());

    let image_url = extract_image(&entry.media, content.as_deref());

    let author = entry
        .authors
        .first()
        .map(|a| a.name.clone())
        .filter(|n| !n.is_empty())
        .or_else(|| feed_title.map(|t| t.to_string()))
        .unwrap_or_else(|| source.name.clone());

    let published_at = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fetched_at);

    let tags = entry.categories.iter().map(|c| c.term.clone()).collect();

    Ok(CandidateItem {
        title,
        link,
        content,
        summary,
        published_at,
        image_url,
        author: Some(author),
        tags,
    })
}

/// Prefer the explicit short-form field (markup stripped, kept whole); fall
/// back to stripping and truncating the long-form content.
fn derive_summary(explicit: Option<&str>, content: Option<&str>) -> Option<String> {
    if let Some(text) = explicit {
        let stripped = strip_markup(text);
        if !stripped.is_empty() {
            return Some(stripped);
        }
    }
    content
        .map(strip_markup)
        .filter(|text| !text.is_empty())
        .map(|text| truncate_at_sentence(&text, SUMMARY_MAX_CHARS))
}

/// Entity-decode, drop tags, collapse whitespace.
fn strip_markup(html: &str) -> String {
    let decoded = html_escape::decode_html_entities(html);
    decoded
        .chars()
        .fold((String::new(), false), |(mut text, in_tag), c| match c {
            '<' => (text, true),
            '>' => (text, false),
            _ if !in_tag => {
                text.push(c);
                (text, in_tag)
            }
            _ => (text, in_tag),
        })
        .0
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters, cutting at the last sentence
/// ending (Latin or full-width East-Asian) when one is present, else at the
/// last word break with an ellipsis, else hard with an ellipsis.
fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    if let Some((idx, c)) = cut
        .char_indices()
        .rev()
        .find(|(_, c)| SENTENCE_ENDINGS.contains(c))
    {
        return cut[..idx + c.len_utf8()].to_string();
    }
    if let Some(idx) = cut.rfind(' ') {
        return format!("{}...", &cut[..idx]);
    }
    format!("{}...", cut)
}

/// Image URL, best effort: a media/enclosure object whose type says image,
/// then an untyped media URL that looks like an image file, then the first
/// media thumbnail, then the first embedded `<img src>` in the long-form
/// content.
fn extract_image(media: &[MediaObject], content: Option<&str>) -> Option<String> {
    // media:content frequently omits the type attribute; remember the first
    // untyped URL with an image extension as a fallback candidate.
    let mut untyped: Option<String> = None;
    for object in media {
        for item in &object.content {
            let url = match &item.url {
                Some(url) => url,
                None => continue,
            };
            match &item.content_type {
                Some(mime) => {
                    if mime.to_string().starts_with("image/") {
                        return Some(url.to_string());
                    }
                }
                None => {
                    if untyped.is_none() && has_image_extension(url.as_str()) {
                        untyped = Some(url.to_string());
                    }
                }
            }
        }
    }
    if untyped.is_some() {
        return untyped;
    }

    for object in media {
        if let Some(thumbnail) = object.thumbnails.first() {
            return Some(thumbnail.image.uri.clone());
        }
    }

    content.and_then(first_image_src)
}

fn has_image_extension(url: &str) -> bool {
    let path = url
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(url);
    matches!(
        path.rsplit('.')
            .next()
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "avif")
    )
}

/// Plain scan for the first `<img ... src=...>` reference, no regex.
fn first_image_src(html: &str) -> Option<String> {
    let bytes = html.as_bytes();
    let img = find_ascii_ci(bytes, b"<img", 0)?;
    let src = find_ascii_ci(bytes, b"src=", img)?;
    let rest = &bytes[src + 4..];

    let value = match *rest.first()? {
        quote @ (b'"' | b'\'') => {
            let end = rest[1..].iter().position(|&b| b == quote)?;
            &rest[1..1 + end]
        }
        _ => {
            let end = rest
                .iter()
                .position(|&b| b.is_ascii_whitespace() || b == b'>')
                .unwrap_or(rest.len());
            &rest[..end]
        }
    };

    let src = std::str::from_utf8(value).ok()?.trim();
    if src.is_empty() {
        None
    } else {
        Some(src.to_string())
    }
}

fn find_ascii_ci(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
