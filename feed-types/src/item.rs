use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Separator used when one source field carries several values.
pub const MULTI_VALUE_SEPARATOR: &str = "|";

/// One parsed source item: field name to string value, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Exact key first, then the lower-cased key.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.get(key).or_else(|| {
            let lower = key.to_lowercase();
            if lower == key {
                None
            } else {
                self.get(&lower)
            }
        })
    }

    /// First non-blank value among `keys`, each tried with [`RawRecord::lookup`].
    pub fn lookup_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.lookup(k))
            .find(|v| !v.trim().is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Adds `value` to `key`, joining with [`MULTI_VALUE_SEPARATOR`] when a value is
    /// already present.
    pub fn append(&mut self, key: impl Into<String>, value: &str) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) if v.is_empty() => v.push_str(value),
            Some((_, v)) => {
                v.push_str(MULTI_VALUE_SEPARATOR);
                v.push_str(value);
            }
            None => self.fields.push((key, value.to_string())),
        }
    }

    /// Continues the text of `key`, one space between segments.
    pub fn extend(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => {
                if !v.is_empty() {
                    v.push(' ');
                }
                v.push_str(value);
            }
            None => self.fields.push((key.to_string(), value.to_string())),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Canonical, format independent product record produced per source item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedItem {
    pub title: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub price: Decimal,
    pub regular_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub ean: Option<String>,
    pub sku: Option<String>,
    pub mpn: Option<String>,
    pub external_id: Option<String>,
    pub image_url: Option<String>,
    pub gallery_images: Vec<String>,
    pub category_path: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub stock_status: Option<String>,
    pub stock_quantity: Option<i64>,
    pub affiliate_url: Option<String>,
    pub button_text: Option<String>,
    pub delivery_time: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_back_to_lowercase_key() {
        let record: RawRecord = [("title", "Lamp"), ("PRICE", "10")].into_iter().collect();
        assert_eq!(record.lookup("TITLE"), Some("Lamp"));
        assert_eq!(record.lookup("PRICE"), Some("10"));
        assert_eq!(record.lookup("price"), None);
    }

    #[test]
    fn lookup_any_skips_blank_values() {
        let record: RawRecord = [("PRODUCTNAME", " "), ("name", "Desk")].into_iter().collect();
        assert_eq!(record.lookup_any(&["PRODUCTNAME", "title", "name"]), Some("Desk"));
    }

    #[test]
    fn append_joins_repeated_values() {
        let mut record = RawRecord::new();
        record.append("IMGURL", "a.jpg");
        record.append("IMGURL", "b.jpg");
        record.extend("IMGURL", "x");
        assert_eq!(record.get("IMGURL"), Some("a.jpg|b.jpg x"));
        assert_eq!(record.len(), 1);
    }
}
