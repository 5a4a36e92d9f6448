//! Incremental detection of inline tagged tool calls.
//!
//! The detector only ever decides on text it has fully seen: a call is
//! reported once its closing tag (or the `/>` of a self-closing tag) is in
//! the buffer, and any ambiguity at the end of the buffer makes it wait for
//! more text. Splitting the same text into different fragments therefore
//! yields the same calls.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::tools::schema::{MappingKind, ToolSchema};

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("attribute regex must compile")
});

/// A complete tagged block found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedTag {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Raw text between the opening and closing tag.
    pub inner: String,
    /// Byte offsets of the whole block in the accumulated text.
    pub start: usize,
    pub end: usize,
}

/// An opening tag still waiting for its closing tag.
#[derive(Debug, Clone)]
struct PendingOpen {
    name: String,
    attributes: String,
    start: usize,
    content_start: usize,
    /// Same-name openers nested inside this block.
    depth: usize,
}

/// Scans accumulated assistant text for registered tags.
///
/// Openers wait on a stack while scanning continues past them, so a stray
/// `<ask>` in prose does not hide a complete block further on. The first
/// block to close wins and demotes every opener still pending to text.
#[derive(Debug, Clone, Default)]
pub struct TaggedCallDetector {
    tags: Vec<String>,
    buffer: String,
    cursor: usize,
    open: Vec<PendingOpen>,
}

impl TaggedCallDetector {
    pub fn new(tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Bytes of text received so far.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a fragment and return every block it completes, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<DetectedTag> {
        self.buffer.push_str(fragment);
        self.scan()
    }

    /// The text is complete: give up on openers that never closed.
    ///
    /// Text behind the outermost abandoned opener is scanned again without
    /// it, so blocks it was holding open are still reported. Returns those
    /// blocks and the names of the abandoned openers.
    pub fn finish(&mut self) -> (Vec<DetectedTag>, Vec<String>) {
        let mut found = Vec::new();
        let mut abandoned = Vec::new();
        while let Some(first) = self.open.first() {
            abandoned.push(first.name.clone());
            self.cursor = first.start + 1;
            self.open.clear();
            found.extend(self.scan());
        }
        self.cursor = self.buffer.len();
        (found, abandoned)
    }

    fn scan(&mut self) -> Vec<DetectedTag> {
        let mut found = Vec::new();
        let buf = self.buffer.as_str();
        let bytes = buf.as_bytes();
        if self.tags.is_empty() {
            self.cursor = buf.len();
            return found;
        }

        loop {
            let Some(rel) = buf[self.cursor..].find('<') else {
                self.cursor = buf.len();
                break;
            };
            let lt = self.cursor + rel;

            if bytes.get(lt + 1) == Some(&b'/') {
                let name_start = lt + 2;
                let name_stop = name_end(bytes, name_start);
                let name = &buf[name_start..name_stop];
                if name_stop == bytes.len() {
                    if self.open.iter().any(|p| p.name.starts_with(name)) {
                        self.cursor = lt;
                        break;
                    }
                    self.cursor = lt + 1;
                    continue;
                }
                let Some(idx) = self.open.iter().rposition(|p| p.name == name) else {
                    self.cursor = lt + 1;
                    continue;
                };
                let gt = skip_whitespace(bytes, name_stop);
                if gt == bytes.len() {
                    self.cursor = lt;
                    break;
                }
                if bytes[gt] != b'>' {
                    self.cursor = lt + 1;
                    continue;
                }
                let pending = &mut self.open[idx];
                if pending.depth > 0 {
                    pending.depth -= 1;
                } else {
                    found.push(DetectedTag {
                        tag: pending.name.clone(),
                        attributes: parse_attributes(&pending.attributes),
                        inner: buf[pending.content_start..lt].to_string(),
                        start: pending.start,
                        end: gt + 1,
                    });
                    self.open.clear();
                }
                self.cursor = gt + 1;
                continue;
            }

            match parse_open(buf, lt) {
                OpenScan::NameCut(name) => {
                    if self.tags.iter().any(|t| t.starts_with(name)) {
                        self.cursor = lt;
                        break;
                    }
                    self.cursor = lt + 1;
                }
                OpenScan::Unterminated(name) => {
                    if self.is_registered(name) {
                        self.cursor = lt;
                        break;
                    }
                    self.cursor = lt + 1;
                }
                OpenScan::NotATag => self.cursor = lt + 1,
                OpenScan::Tag(open) if !self.is_registered(open.name) => self.cursor = lt + 1,
                OpenScan::Tag(open) if open.self_closing => {
                    found.push(DetectedTag {
                        tag: open.name.to_string(),
                        attributes: parse_attributes(open.attributes),
                        inner: String::new(),
                        start: lt,
                        end: open.end,
                    });
                    self.open.clear();
                    self.cursor = open.end;
                }
                OpenScan::Tag(open) => {
                    match self.open.iter_mut().rev().find(|p| p.name == open.name) {
                        Some(outer) => outer.depth += 1,
                        None => self.open.push(PendingOpen {
                            name: open.name.to_string(),
                            attributes: open.attributes.to_string(),
                            start: lt,
                            content_start: open.end,
                            depth: 0,
                        }),
                    }
                    self.cursor = open.end;
                }
            }
        }
        found
    }

    fn is_registered(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t == name)
    }
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_' | b':' | b'.')
}

fn name_end(bytes: &[u8], from: usize) -> usize {
    let mut idx = from;
    while idx < bytes.len() && is_name_char(bytes[idx]) {
        idx += 1;
    }
    idx
}

fn skip_whitespace(bytes: &[u8], from: usize) -> usize {
    let mut idx = from;
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    idx
}

struct OpenTag<'a> {
    name: &'a str,
    attributes: &'a str,
    self_closing: bool,
    /// Offset just past the closing `>`.
    end: usize,
}

enum OpenScan<'a> {
    Tag(OpenTag<'a>),
    /// The buffer ends inside the tag name.
    NameCut(&'a str),
    /// The name is complete but the buffer ends before `>`.
    Unterminated(&'a str),
    NotATag,
}

/// Parse an opening tag starting at the `<` at `lt`.
fn parse_open(buf: &str, lt: usize) -> OpenScan<'_> {
    let bytes = buf.as_bytes();
    let start = lt + 1;
    let end = name_end(bytes, start);
    if end == bytes.len() {
        return OpenScan::NameCut(&buf[start..end]);
    }
    if end == start {
        return OpenScan::NotATag;
    }
    let name = &buf[start..end];
    if !(bytes[end].is_ascii_whitespace() || bytes[end] == b'>' || bytes[end] == b'/') {
        return OpenScan::NotATag;
    }

    let mut quote: Option<u8> = None;
    for (idx, &b) in bytes.iter().enumerate().skip(end) {
        if b == b'<' {
            return OpenScan::NotATag;
        }
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => {
                let raw = &buf[end..idx];
                let trimmed = raw.trim_end();
                let self_closing = trimmed.ends_with('/');
                let attributes = if self_closing {
                    &trimmed[..trimmed.len() - 1]
                } else {
                    raw
                };
                return OpenScan::Tag(OpenTag {
                    name,
                    attributes,
                    self_closing,
                    end: idx + 1,
                });
            }
            None => {}
        }
    }
    OpenScan::Unterminated(name)
}

enum CloseScan {
    Found { inner_end: usize, end: usize },
    Incomplete,
}

/// Find the `</name>` matching an opening tag, skipping nested `<name>` blocks.
fn find_close(buf: &str, name: &str, from: usize) -> CloseScan {
    let bytes = buf.as_bytes();
    let mut depth = 0usize;
    let mut pos = from;

    while let Some(rel) = buf[pos..].find('<') {
        let lt = pos + rel;
        if bytes.get(lt + 1) == Some(&b'/') {
            let start = lt + 2;
            let end = name_end(bytes, start);
            if end == bytes.len() {
                return CloseScan::Incomplete;
            }
            if &buf[start..end] == name {
                let k = skip_whitespace(bytes, end);
                if k == bytes.len() {
                    return CloseScan::Incomplete;
                }
                if bytes[k] == b'>' {
                    if depth == 0 {
                        return CloseScan::Found {
                            inner_end: lt,
                            end: k + 1,
                        };
                    }
                    depth -= 1;
                    pos = k + 1;
                    continue;
                }
            }
            pos = lt + 1;
            continue;
        }

        match parse_open(buf, lt) {
            OpenScan::Tag(open) if open.name == name => {
                if !open.self_closing {
                    depth += 1;
                }
                pos = open.end;
            }
            OpenScan::NameCut(partial) if name.starts_with(partial) => return CloseScan::Incomplete,
            OpenScan::Unterminated(other) if other == name => return CloseScan::Incomplete,
            _ => pos = lt + 1,
        }
    }
    CloseScan::Incomplete
}

fn parse_attributes(raw: &str) -> BTreeMap<String, String> {
    ATTRIBUTE_RE
        .captures_iter(raw)
        .map(|cap| {
            let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
            (cap[1].to_string(), unescape(value))
        })
        .collect()
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text of the first child element `name` inside `text`, if complete.
fn child_element<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let mut pos = 0;
    while let Some(rel) = text[pos..].find('<') {
        let lt = pos + rel;
        match parse_open(text, lt) {
            OpenScan::Tag(open) if open.name == name => {
                if open.self_closing {
                    return Some("");
                }
                return match find_close(text, name, open.end) {
                    CloseScan::Found { inner_end, .. } => Some(&text[open.end..inner_end]),
                    CloseScan::Incomplete => None,
                };
            }
            _ => pos = lt + 1,
        }
    }
    None
}

/// Build structured arguments from a detected block using the tool's mappings.
///
/// Values are strings unless the structured schema declares another JSON
/// type, in which case the text is parsed as JSON when possible. A tool
/// without mappings receives its attributes as arguments.
pub fn extract_arguments(detected: &DetectedTag, schema: &ToolSchema) -> serde_json::Value {
    let mut args = serde_json::Map::new();
    let mappings = schema
        .tagged
        .as_ref()
        .map(|t| t.mappings.as_slice())
        .unwrap_or_default();

    if mappings.is_empty() {
        for (key, value) in &detected.attributes {
            args.insert(key.clone(), coerce(schema, key, value));
        }
        return serde_json::Value::Object(args);
    }

    for mapping in mappings {
        let raw = match mapping.kind {
            MappingKind::Attribute => detected.attributes.get(&mapping.path).cloned(),
            MappingKind::Content => Some(detected.inner.clone()),
            MappingKind::Element => mapping
                .path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .try_fold(detected.inner.as_str(), |text, segment| child_element(text, segment))
                .map(str::to_string),
        };
        if let Some(raw) = raw {
            args.insert(mapping.param.clone(), coerce(schema, &mapping.param, &raw));
        }
    }
    serde_json::Value::Object(args)
}

fn coerce(schema: &ToolSchema, param: &str, raw: &str) -> serde_json::Value {
    match schema.structured.property_type(param) {
        None | Some("string") => serde_json::Value::String(raw.to_string()),
        Some(_) => serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
    }
}
