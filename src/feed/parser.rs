use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;
use thiserror::Error;

/// Wire format detected while parsing a feed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// JSON Feed (`{"items": [{"id": ...}]}`)
    JsonFeed,
    /// Atom (`<feed><entry><id>`)
    Atom,
    /// RSS 0.9x/2.0 and RSS 1.0/RDF (`<item><guid>` or `<item><link>`)
    Rss,
}

/// Item identifiers of one fetched feed document, newest first.
///
/// The order is exactly the document order; publication timestamps are
/// ignored because many feeds omit or misreport them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub format: FeedFormat,
    pub ids: Vec<String>,
    /// Number of items dropped because they carried no usable identifier
    pub skipped: usize,
}

/// Errors raised for documents that are not a usable feed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Body was empty or whitespace only
    #[error("empty document")]
    Empty,
    /// Body is neither a JSON object nor an RSS/Atom XML document
    #[error("unrecognized feed format")]
    Unrecognized,
    /// Body looked like JSON but was not a JSON Feed
    #[error("invalid JSON feed: {0}")]
    Json(String),
    /// Body looked like XML but was malformed
    #[error("invalid XML feed: {0}")]
    Xml(#[from] quick_xml::Error),
    /// XML document ended with unclosed elements
    #[error("truncated XML feed")]
    Truncated,
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Json(err.to_string())
    }
}

/// Parses a feed document into its ordered item identifiers.
///
/// The format is chosen by sniffing the first non-whitespace byte (after an
/// optional UTF-8 BOM): `{` selects JSON Feed, `<` selects XML, where the root
/// element decides between RSS (`rss`, `rdf:RDF`) and Atom (`feed`).
///
/// # Errors
///
/// Returns [`ParseError`] for empty, malformed, or unrecognized documents.
/// Individual items without an identifier are skipped, not treated as errors.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedSnapshot, ParseError> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or(ParseError::Empty)?;
    let body = &body[start..];

    let snapshot = match body[0] {
        b'{' => parse_json_feed(body)?,
        b'<' => parse_xml_feed(body)?,
        _ => return Err(ParseError::Unrecognized),
    };

    if snapshot.skipped > 0 {
        tracing::debug!(
            format = ?snapshot.format,
            skipped = snapshot.skipped,
            kept = snapshot.ids.len(),
            "Feed items without identifiers skipped"
        );
    }

    Ok(snapshot)
}

fn parse_json_feed(body: &[u8]) -> Result<FeedSnapshot, ParseError> {
    let document: Value = serde_json::from_slice(body)?;
    let items = document
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::Json("missing `items` array".to_string()))?;

    let mut ids = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match item.get("id").and_then(json_id) {
            Some(id) => ids.push(id),
            None => skipped += 1,
        }
    }

    Ok(FeedSnapshot {
        format: FeedFormat::JsonFeed,
        ids,
        skipped,
    })
}

/// JSON Feed ids are strings, but numeric ids are common enough to accept.
fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Which identifier field of an item the reader is currently inside.
#[derive(Clone, Copy, PartialEq, Eq)]
enum IdField {
    Primary,
    Fallback,
}

/// An `<item>`/`<entry>` being read. `depth` is the stack depth with the
/// item element itself on top.
struct ItemDraft {
    depth: usize,
    primary: Option<String>,
    fallback: Option<String>,
    field: Option<IdField>,
    text: String,
}

impl ItemDraft {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            primary: None,
            fallback: None,
            field: None,
            text: String::new(),
        }
    }

    fn close_field(&mut self) {
        let Some(field) = self.field.take() else {
            return;
        };
        let value = non_blank(&self.text);
        self.text.clear();
        let slot = match field {
            IdField::Primary => &mut self.primary,
            IdField::Fallback => &mut self.fallback,
        };
        if slot.is_none() {
            *slot = value;
        }
    }

    fn finish(self) -> Option<String> {
        self.primary.or(self.fallback)
    }
}

fn detect_root(root: &BytesStart<'_>) -> Result<FeedFormat, ParseError> {
    match root.local_name().as_ref() {
        b"rss" | b"RDF" => Ok(FeedFormat::Rss),
        b"feed" => Ok(FeedFormat::Atom),
        _ => Err(ParseError::Unrecognized),
    }
}

fn item_tag(format: FeedFormat) -> &'static [u8] {
    match format {
        FeedFormat::Atom => b"entry",
        _ => b"item",
    }
}

/// Classifies a direct child of an item as one of its identifier fields.
fn id_field(format: FeedFormat, child: &BytesStart<'_>) -> Option<IdField> {
    let local = child.local_name();
    match (format, local.as_ref()) {
        (FeedFormat::Atom, b"id") => Some(IdField::Primary),
        (FeedFormat::Rss, b"guid") => Some(IdField::Primary),
        // `<atom:link href=".."/>` inside RSS items is not the item link
        (FeedFormat::Rss, b"link") if child.name().prefix().is_none() => Some(IdField::Fallback),
        _ => None,
    }
}

fn parse_xml_feed(body: &[u8]) -> Result<FeedSnapshot, ParseError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut format: Option<FeedFormat> = None;
    let mut draft: Option<ItemDraft> = None;
    let mut ids = Vec::new();
    let mut skipped = 0;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                match format {
                    None => format = Some(detect_root(&e)?),
                    Some(fmt) => {
                        if let Some(item) = draft.as_mut() {
                            if depth == item.depth {
                                item.field = id_field(fmt, &e);
                                item.text.clear();
                            }
                        } else if e.local_name().as_ref() == item_tag(fmt) {
                            draft = Some(ItemDraft::new(depth + 1));
                        }
                    }
                }
                depth += 1;
            }
            Event::Empty(e) => match (format, draft.as_ref()) {
                // `<feed/>` or `<rss/>`: a valid document without items
                (None, _) => {
                    format = Some(detect_root(&e)?);
                    break;
                }
                (Some(fmt), None) if e.local_name().as_ref() == item_tag(fmt) => skipped += 1,
                _ => {}
            },
            Event::Text(e) => {
                if let Some(item) = draft.as_mut().filter(|d| d.field.is_some()) {
                    if depth == item.depth + 1 {
                        let text = e
                            .unescape()
                            .map(|t| t.into_owned())
                            .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                        item.text.push_str(&text);
                    }
                }
            }
            Event::CData(e) => {
                if let Some(item) = draft.as_mut().filter(|d| d.field.is_some()) {
                    if depth == item.depth + 1 {
                        item.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                let item_depth = draft.as_ref().map(|item| item.depth);
                if item_depth == Some(depth) {
                    if let Some(item) = draft.as_mut() {
                        item.close_field();
                    }
                } else if item_depth == Some(depth + 1) {
                    match draft.take().and_then(ItemDraft::finish) {
                        Some(id) => ids.push(id),
                        None => skipped += 1,
                    }
                }
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => {
                if depth > 0 {
                    return Err(ParseError::Truncated);
                }
                break;
            }
            // Declarations, comments, processing instructions and DOCTYPE
            // carry no items. Entity declarations are never expanded.
            _ => {}
        }
        buf.clear();
    }

    let format = format.ok_or(ParseError::Unrecognized)?;
    Ok(FeedSnapshot {
        format,
        ids,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(snapshot: &FeedSnapshot) -> Vec<&str> {
        snapshot.ids.iter().map(String::as_str).collect()
    }

    // --- JSON Feed ---

    const JSON_FEED: &str = r#"{
        "version": "https://jsonfeed.org/version/1.1",
        "title": "Daring Fireball",
        "items": [
            {"id": "A", "title": "Newest"},
            {"id": "B", "title": "Middle"},
            {"id": "C", "title": "Oldest"}
        ]
    }"#;

    #[test]
    fn test_json_feed_preserves_document_order() {
        let snapshot = parse_feed(JSON_FEED.as_bytes()).unwrap();
        assert_eq!(snapshot.format, FeedFormat::JsonFeed);
        assert_eq!(ids(&snapshot), vec!["A", "B", "C"]);
        assert_eq!(snapshot.skipped, 0);
    }

    #[test]
    fn test_json_feed_numeric_ids_accepted() {
        let snapshot = parse_feed(br#"{"items": [{"id": 42}, {"id": "7"}]}"#).unwrap();
        assert_eq!(ids(&snapshot), vec!["42", "7"]);
    }

    #[test]
    fn test_json_feed_items_without_id_skipped() {
        let body = br#"{"items": [{"id": "A"}, {"title": "no id"}, {"id": "  "}, "junk", {"id": "D"}]}"#;
        let snapshot = parse_feed(body).unwrap();
        assert_eq!(ids(&snapshot), vec!["A", "D"]);
        assert_eq!(snapshot.skipped, 3);
    }

    #[test]
    fn test_json_feed_without_items_is_error() {
        let result = parse_feed(br#"{"version": "1.1", "title": "x"}"#);
        assert!(matches!(result, Err(ParseError::Json(_))));
    }

    #[test]
    fn test_json_truncated_is_error() {
        let result = parse_feed(br#"{"items": [{"id": "A"}"#);
        assert!(matches!(result, Err(ParseError::Json(_))));
    }

    #[test]
    fn test_json_feed_with_bom_and_whitespace() {
        let mut body = b"\xEF\xBB\xBF\n  ".to_vec();
        body.extend_from_slice(JSON_FEED.as_bytes());
        let snapshot = parse_feed(&body).unwrap();
        assert_eq!(ids(&snapshot), vec!["A", "B", "C"]);
    }

    // --- Atom ---

    const ATOM_FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>urn:feed:not-an-entry</id>
  <title>Example</title>
  <entry>
    <id>tag:example.com,2024:3</id>
    <title>Third</title>
    <source><id>urn:source:ignored</id></source>
  </entry>
  <entry>
    <title>No id here</title>
  </entry>
  <entry>
    <id> tag:example.com,2024:1 </id>
    <link href="https://example.com/1"/>
  </entry>
</feed>"#;

    #[test]
    fn test_atom_entry_ids_in_order() {
        let snapshot = parse_feed(ATOM_FEED.as_bytes()).unwrap();
        assert_eq!(snapshot.format, FeedFormat::Atom);
        assert_eq!(
            ids(&snapshot),
            vec!["tag:example.com,2024:3", "tag:example.com,2024:1"]
        );
        assert_eq!(snapshot.skipped, 1);
    }

    #[test]
    fn test_atom_prefixed_namespace() {
        let body = r#"<a:feed xmlns:a="http://www.w3.org/2005/Atom">
            <a:entry><a:id>one</a:id></a:entry>
            <a:entry><a:id>two</a:id></a:entry>
        </a:feed>"#;
        let snapshot = parse_feed(body.as_bytes()).unwrap();
        assert_eq!(snapshot.format, FeedFormat::Atom);
        assert_eq!(ids(&snapshot), vec!["one", "two"]);
    }

    #[test]
    fn test_empty_atom_feed() {
        let snapshot = parse_feed(br#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#).unwrap();
        assert_eq!(snapshot.format, FeedFormat::Atom);
        assert!(snapshot.ids.is_empty());
    }

    // --- RSS ---

    const RSS_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <item>
      <guid isPermaLink="false">post-3</guid>
      <link>https://example.com/3</link>
    </item>
    <item>
      <atom:link href="https://example.com/self"/>
      <link>https://example.com/2</link>
    </item>
    <item>
      <guid><![CDATA[post-1]]></guid>
    </item>
    <item>
      <title>Nothing to identify me</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_rss_guid_with_link_fallback() {
        let snapshot = parse_feed(RSS_FEED.as_bytes()).unwrap();
        assert_eq!(snapshot.format, FeedFormat::Rss);
        assert_eq!(
            ids(&snapshot),
            vec!["post-3", "https://example.com/2", "post-1"]
        );
        assert_eq!(snapshot.skipped, 1);
    }

    #[test]
    fn test_rss_channel_link_not_mistaken_for_item() {
        let body = r#"<rss version="2.0"><channel>
            <link>https://example.com/</link>
        </channel></rss>"#;
        let snapshot = parse_feed(body.as_bytes()).unwrap();
        assert!(snapshot.ids.is_empty());
        assert_eq!(snapshot.skipped, 0);
    }

    #[test]
    fn test_rss_blank_guid_falls_back_to_link() {
        let body = r#"<rss version="2.0"><channel>
            <item><guid>   </guid><link>https://example.com/a</link></item>
        </channel></rss>"#;
        let snapshot = parse_feed(body.as_bytes()).unwrap();
        assert_eq!(ids(&snapshot), vec!["https://example.com/a"]);
    }

    #[test]
    fn test_rss_entities_unescaped() {
        let body = r#"<rss version="2.0"><channel>
            <item><link>https://example.com/?a=1&amp;b=2</link></item>
        </channel></rss>"#;
        let snapshot = parse_feed(body.as_bytes()).unwrap();
        assert_eq!(ids(&snapshot), vec!["https://example.com/?a=1&b=2"]);
    }

    #[test]
    fn test_rdf_items_use_link() {
        let body = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel rdf:about="https://example.com/">
    <items><rdf:Seq><rdf:li rdf:resource="https://example.com/b"/></rdf:Seq></items>
  </channel>
  <item rdf:about="https://example.com/b"><link>https://example.com/b</link></item>
  <item rdf:about="https://example.com/a"><link>https://example.com/a</link></item>
</rdf:RDF>"#;
        let snapshot = parse_feed(body.as_bytes()).unwrap();
        assert_eq!(snapshot.format, FeedFormat::Rss);
        assert_eq!(
            ids(&snapshot),
            vec!["https://example.com/b", "https://example.com/a"]
        );
    }

    // --- Failures ---

    #[test]
    fn test_empty_body_is_error() {
        assert!(matches!(parse_feed(b""), Err(ParseError::Empty)));
        assert!(matches!(parse_feed(b" \n\t "), Err(ParseError::Empty)));
    }

    #[test]
    fn test_html_page_is_unrecognized() {
        let body = b"<!DOCTYPE html><html><head><title>Hi</title></head></html>";
        assert!(matches!(parse_feed(body), Err(ParseError::Unrecognized)));
    }

    #[test]
    fn test_plain_text_is_unrecognized() {
        assert!(matches!(
            parse_feed(b"Service Unavailable"),
            Err(ParseError::Unrecognized)
        ));
    }

    #[test]
    fn test_mismatched_tags_are_error() {
        let body = b"<rss><channel><item><guid>1</link></item></channel></rss>";
        assert!(matches!(parse_feed(body), Err(ParseError::Xml(_))));
    }

    #[test]
    fn test_truncated_xml_is_error() {
        let body = b"<rss version=\"2.0\"><channel><item><guid>1</guid></item>";
        assert!(parse_feed(body).is_err());
    }

    #[test]
    fn test_declaration_only_is_unrecognized() {
        assert!(matches!(
            parse_feed(b"<?xml version=\"1.0\"?>"),
            Err(ParseError::Unrecognized)
        ));
    }
}
