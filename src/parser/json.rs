use crate::error::{ItemError, ParseError};
use crate::format::strip_bom;
use feed_types::item::{RawRecord, MULTI_VALUE_SEPARATOR};
use itertools::Itertools;
use serde_json::Value;

pub const ARRAY_KEYS: &[&str] = &["products", "items", "offers", "data", "results", "SHOPITEM"];

pub struct JsonRecords {
    items: std::vec::IntoIter<Value>,
}

impl JsonRecords {
    pub fn new(data: &[u8]) -> Result<Self, ParseError> {
        let document: Value = serde_json::from_slice(strip_bom(data))?;
        let items = find_products(document).ok_or(ParseError::NoProductArray)?;
        Ok(Self {
            items: items.into_iter(),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.len() == 0
    }
}

/// Root array, or the first array under a conventional key (as written, then lower-cased).
fn find_products(document: Value) -> Option<Vec<Value>> {
    match document {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            let key = ARRAY_KEYS
                .iter()
                .flat_map(|k| [k.to_string(), k.to_lowercase()])
                .find(|k| matches!(map.get(k), Some(Value::Array(_))))?;
            match map.remove(&key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }
        }
        _ => None,
    }
}

fn text_of(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(text_of)
                .join(MULTI_VALUE_SEPARATOR),
        ),
        object @ Value::Object(_) => Some(object.to_string()),
    }
}

impl Iterator for JsonRecords {
    type Item = Result<RawRecord, ItemError>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.items.next()? {
            Value::Object(map) => Ok(map
                .into_iter()
                .filter_map(|(k, v)| text_of(v).map(|v| (k, v)))
                .collect()),
            other => Err(ItemError::Malformed(format!(
                "expected an object, found {other}"
            ))),
        })
    }
}
