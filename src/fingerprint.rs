use derive_more::{Deref, Display};
use feed_types::item::FeedItem;
use md5::{Digest, Md5};

/// Hex MD5 over the change-relevant fields of an item. Stock, attributes and identifiers
/// other than the EAN are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Deref)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(item: &FeedItem) -> Self {
        let canonical = format!(
            "{}|{}|{}|{:.2}|{}|{}",
            item.title,
            item.description.as_deref().unwrap_or_default(),
            item.ean.as_deref().unwrap_or_default(),
            item.price.round_dp(2),
            item.image_url.as_deref().unwrap_or_default(),
            item.category_path.as_deref().unwrap_or_default(),
        );
        Self(format!("{:x}", Md5::digest(canonical.as_bytes())))
    }

    pub fn matches(&self, stored: Option<&str>) -> bool {
        stored == Some(self.0.as_str())
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}
