use crate::category::Category;
use crate::feed::FeedConfig;
use crate::item::FeedItem;
use crate::MatchKey;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use typesafe_repository::async_ops::{Get, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use uuid::Uuid;

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    #[id]
    pub id: Uuid,
    pub feed_id: IdentityOf<FeedConfig>,
    pub slug: String,
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
    pub category_id: Option<IdentityOf<Category>>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub stock_status: Option<String>,
    pub stock_quantity: Option<i64>,
    pub affiliate_url: Option<String>,
    pub button_text: Option<String>,
    pub delivery_time: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub fingerprint: String,
    pub is_active: bool,
}

impl Product {
    /// Builds the stored record for `item`. Images are dropped when `with_images` is off.
    pub fn from_item(
        id: Uuid,
        feed_id: IdentityOf<FeedConfig>,
        slug: String,
        item: FeedItem,
        category_id: Option<IdentityOf<Category>>,
        fingerprint: String,
        with_images: bool,
    ) -> Self {
        let (image_url, gallery_images) = if with_images {
            (item.image_url, item.gallery_images)
        } else {
            (None, Vec::new())
        };
        Self {
            id,
            feed_id,
            slug,
            title: item.title,
            description: item.description,
            short_description: item.short_description,
            price: item.price,
            regular_price: item.regular_price,
            sale_price: item.sale_price,
            ean: item.ean,
            sku: item.sku,
            mpn: item.mpn,
            external_id: item.external_id,
            image_url,
            gallery_images,
            category_id,
            brand: item.brand,
            manufacturer: item.manufacturer,
            stock_status: item.stock_status,
            stock_quantity: item.stock_quantity,
            affiliate_url: item.affiliate_url,
            button_text: item.button_text,
            delivery_time: item.delivery_time,
            attributes: item.attributes,
            fingerprint,
            is_active: true,
        }
    }
}

/// Stored product matched by key: just enough to decide whether to write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistingProduct {
    pub id: IdentityOf<Product>,
    pub fingerprint: Option<String>,
}

#[async_trait]
pub trait ProductRepository:
    Repository<Product, Error = anyhow::Error> + Save<Product> + Get<Product> + Send + Sync
{
    async fn find_by_key(
        &self,
        key: MatchKey,
        value: &str,
    ) -> Result<Option<ExistingProduct>, Self::Error>;
    async fn count_by_feed(&self, feed: &IdentityOf<FeedConfig>) -> Result<usize, Self::Error>;
}
