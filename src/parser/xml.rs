use crate::format::strip_bom;
use encoding_rs::{Encoding, UTF_8};
use feed_types::item::RawRecord;
use lazy_regex::bytes_regex;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;

pub const DEFAULT_ITEM_PATH: &str = "SHOPITEM";
pub const ITEM_PATH_CANDIDATES: &[&str] = &[
    "SHOPITEM", "product", "item", "offer", "entry", "PRODUCT", "ITEM",
];
const MAX_CONSECUTIVE_ERRORS: usize = 64;
const DECLARATION_WINDOW: usize = 512;

/// Sanitized, repaired and decoded document ready for traversal.
pub struct PreparedXml {
    pub text: String,
    pub item_path: String,
    pub encoding: &'static str,
}

pub fn prepare(data: &[u8], item_path: Option<&str>) -> PreparedXml {
    let mut bytes = sanitize(data);
    let item_path = match item_path {
        Some(path) => path.to_string(),
        None => detect_item_path(&bytes).to_string(),
    };
    repair(&mut bytes, &item_path);
    let label = detect_encoding(&bytes);
    let (text, encoding) = decode(&bytes, label.as_deref());
    PreparedXml {
        text,
        item_path,
        encoding,
    }
}

/// Drops the BOM and control bytes other than tab, line feed and carriage return.
pub fn sanitize(data: &[u8]) -> Vec<u8> {
    strip_bom(data)
        .iter()
        .copied()
        .filter(|b| *b >= 0x20 || matches!(b, b'\t' | b'\n' | b'\r'))
        .collect()
}

pub fn detect_item_path(data: &[u8]) -> &'static str {
    ITEM_PATH_CANDIDATES
        .iter()
        .copied()
        .find(|name| has_open_tag(data, name))
        .unwrap_or(DEFAULT_ITEM_PATH)
}

fn has_open_tag(data: &[u8], name: &str) -> bool {
    let needle_len = name.len() + 1;
    data.windows(needle_len + 1).any(|w| {
        w[0] == b'<'
            && &w[1..needle_len] == name.as_bytes()
            && matches!(w[needle_len], b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r')
    })
}

/// Cuts the document after the last complete item and closes the root element.
/// Does nothing when no complete item exists.
pub fn repair(data: &mut Vec<u8>, item_path: &str) {
    let closing = format!("</{item_path}>");
    let Some(pos) = rfind_ignore_case(data, closing.as_bytes()) else {
        return;
    };
    let end = pos + closing.len();
    if end < data.len() {
        data.truncate(end);
    }
    if let Some(root) = root_name(data) {
        if root.eq_ignore_ascii_case(item_path) {
            return;
        }
        let root_closing = format!("</{root}>");
        if rfind_ignore_case(data, root_closing.as_bytes()).is_none() {
            data.extend_from_slice(root_closing.as_bytes());
        }
    }
}

fn rfind_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|w| w.eq_ignore_ascii_case(needle))
}

/// Name of the first element, skipping the declaration, comments and doctype.
fn root_name(data: &[u8]) -> Option<String> {
    let mut rest = data;
    while let Some(start) = rest.iter().position(|b| *b == b'<') {
        rest = &rest[start + 1..];
        match rest.first() {
            Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {
                let end = rest
                    .iter()
                    .position(|b| b.is_ascii_whitespace() || matches!(b, b'>' | b'/'))
                    .unwrap_or(rest.len());
                return Some(String::from_utf8_lossy(&rest[..end]).to_string());
            }
            _ => continue,
        }
    }
    None
}

pub fn detect_encoding(data: &[u8]) -> Option<String> {
    let window = &data[..data.len().min(DECLARATION_WINDOW)];
    bytes_regex!(r#"encoding\s*=\s*["']([^"']+)["']"#)
        .captures(window)
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).trim().to_string())
}

/// Decodes with the declared charset, falling back to UTF-8 for unknown labels.
pub fn decode(data: &[u8], label: Option<&str>) -> (String, &'static str) {
    let encoding = match label {
        Some(label) => Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            log::warn!("Unknown feed encoding {label}, decoding as UTF-8");
            UTF_8
        }),
        None => UTF_8,
    };
    let (text, used, had_errors) = encoding.decode(data);
    if had_errors {
        log::debug!("Feed contains bytes invalid in {}", used.name());
    }
    (text.into_owned(), used.name())
}

/// Depth-tracked state of the walk over one document.
#[derive(Default)]
struct ItemWalker {
    item_path: String,
    path: Vec<String>,
    seqs: Vec<u64>,
    seq: u64,
    item_depth: Option<usize>,
    nested_items: usize,
    record: RawRecord,
    attr_keys: Vec<String>,
    last_write: HashMap<String, u64>,
}

impl ItemWalker {
    fn is_item(&self, name: &str) -> bool {
        self.item_depth.is_none() && name.eq_ignore_ascii_case(&self.item_path)
    }

    fn begin_item(&mut self, attrs: Vec<(String, String)>) {
        self.record = RawRecord::new();
        self.nested_items = 0;
        self.attr_keys.clear();
        self.last_write.clear();
        for (k, v) in attrs {
            if !v.is_empty() {
                self.record.insert(k.clone(), v);
                self.attr_keys.push(k);
            }
        }
    }

    fn open(&mut self, name: String, attrs: Vec<(String, String)>) {
        let starts_item = self.is_item(&name);
        if self.item_depth.is_some() && name.eq_ignore_ascii_case(&self.item_path) {
            self.nested_items += 1;
        }
        self.seq += 1;
        self.path.push(name);
        self.seqs.push(self.seq);
        if starts_item {
            self.item_depth = Some(self.path.len());
            self.begin_item(attrs);
        }
    }

    fn empty(&mut self, name: &str, attrs: Vec<(String, String)>) -> Option<RawRecord> {
        if !self.is_item(name) {
            return None;
        }
        self.begin_item(attrs);
        Some(std::mem::take(&mut self.record))
    }

    /// A closing item tag always ends the current item. Stray start tags read from
    /// unescaped `<` in text are dropped from the path here.
    fn close(&mut self, name: &str) -> Option<RawRecord> {
        if let Some(depth) = self.item_depth {
            if name.eq_ignore_ascii_case(&self.item_path) {
                if self.nested_items > 0 {
                    self.nested_items -= 1;
                } else {
                    if self.path.len() > depth {
                        log::debug!(
                            "Resynchronising on </{name}> with {} unclosed elements",
                            self.path.len() - depth
                        );
                    }
                    self.path.truncate(depth.saturating_sub(1));
                    self.seqs.truncate(depth.saturating_sub(1));
                    self.item_depth = None;
                    return Some(std::mem::take(&mut self.record));
                }
            }
        }
        self.path.pop();
        self.seqs.pop();
        None
    }

    fn text(&mut self, text: &str) {
        let Some(depth) = self.item_depth else {
            return;
        };
        if self.path.len() <= depth {
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let (Some(key), Some(&seq)) = (self.path.last(), self.seqs.last()) else {
            return;
        };
        if let Some(idx) = self.attr_keys.iter().position(|k| k == key) {
            self.attr_keys.swap_remove(idx);
            self.record.insert(key.clone(), text);
        } else if self.last_write.get(key) == Some(&seq) {
            self.record.extend(key, text);
        } else {
            self.record.append(key.clone(), text);
        }
        self.last_write.insert(key.clone(), seq);
    }
}

/// Records of one document, produced lazily by a token walk.
pub struct XmlRecords {
    reader: Reader<Cursor<Vec<u8>>>,
    buf: Vec<u8>,
    walker: ItemWalker,
    consecutive_errors: usize,
}

impl XmlRecords {
    pub fn new(doc: PreparedXml) -> Self {
        let mut reader = Reader::from_reader(Cursor::new(doc.text.into_bytes()));
        reader.config_mut().check_end_names = false;
        Self {
            reader,
            buf: Vec::new(),
            walker: ItemWalker {
                item_path: doc.item_path,
                ..Default::default()
            },
            consecutive_errors: 0,
        }
    }
}

fn local_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_string()
}

fn attributes(e: &BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .filter_map(Result::ok)
        .map(|a| {
            let value = a
                .unescape_value()
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).to_string());
            (local_name(a.key.local_name().as_ref()), value.trim().to_string())
        })
        .collect()
}

impl Iterator for XmlRecords {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf);
            if event.is_ok() {
                self.consecutive_errors = 0;
            }
            match event {
                Ok(Event::Start(e)) => {
                    let name = local_name(e.local_name().as_ref());
                    let attrs = if self.walker.is_item(&name) {
                        attributes(&e)
                    } else {
                        Vec::new()
                    };
                    self.walker.open(name, attrs);
                }
                Ok(Event::Empty(e)) => {
                    let name = local_name(e.local_name().as_ref());
                    if self.walker.is_item(&name) {
                        let attrs = attributes(&e);
                        if let Some(record) = self.walker.empty(&name, attrs) {
                            return Some(record);
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    let name = local_name(e.local_name().as_ref());
                    if let Some(record) = self.walker.close(&name) {
                        return Some(record);
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map(Cow::into_owned)
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).to_string());
                    self.walker.text(&text);
                }
                Ok(Event::CData(c)) => {
                    let text = String::from_utf8_lossy(&c).to_string();
                    self.walker.text(&text);
                }
                Ok(Event::Eof) => return None,
                Ok(_) => {}
                Err(err) => {
                    self.consecutive_errors += 1;
                    log::debug!("Skipping malformed XML token: {err}");
                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        log::warn!("Too many consecutive XML errors, stopping traversal");
                        return None;
                    }
                }
            }
        }
    }
}
