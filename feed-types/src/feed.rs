use crate::{FeedFormat, ImportMode, MatchKey, UnknownVariant};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use uuid::Uuid;

/// Description of one remote feed. Read-only for the duration of a run.
#[derive(Id, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeedConfig {
    #[id]
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub format: Option<FeedFormat>,
    #[serde(default)]
    pub xml_item_path: Option<String>,
    #[serde(default)]
    pub csv_delimiter: Option<char>,
    #[serde(default = "default_true")]
    pub csv_has_header: bool,
    #[serde(default)]
    pub import_mode: ImportMode,
    #[serde(default)]
    pub match_by: MatchKey,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub default_category: Option<String>,
    #[serde(default = "default_true")]
    pub import_images: bool,
    #[serde(default)]
    pub price_locale: PriceLocale,
}

fn default_true() -> bool {
    true
}

impl FeedConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            format: None,
            xml_item_path: None,
            csv_delimiter: None,
            csv_has_header: true,
            import_mode: ImportMode::default(),
            match_by: MatchKey::default(),
            field_mappings: Vec::new(),
            default_category: None,
            import_images: true,
            price_locale: PriceLocale::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: TargetField,
    #[serde(default)]
    pub transform: Option<TransformType>,
    #[serde(default)]
    pub transform_value: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    pub fn new(source_field: impl Into<String>, target_field: TargetField) -> Self {
        Self {
            source_field: source_field.into(),
            target_field,
            transform: None,
            transform_value: None,
            default_value: None,
            required: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
pub enum TransformType {
    #[display("trim")]
    Trim,
    #[display("lowercase")]
    Lowercase,
    #[display("uppercase")]
    Uppercase,
    /// `pattern|||replacement`
    #[display("regex")]
    Regex,
    #[display("default")]
    Default,
}

/// Decimal convention used when reading price-like fields.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "lowercase")]
pub enum PriceLocale {
    /// Keep digits, commas and periods, then treat every comma as a decimal point.
    #[default]
    #[display("legacy")]
    Legacy,
    /// `1.234,56`
    #[display("comma")]
    Comma,
    /// `1,234.56`
    #[display("period")]
    Period,
}

/// Canonical product field a mapping writes into.
#[derive(SerializeDisplay, DeserializeFromStr, Debug, Clone, PartialEq, Eq, Hash, Display)]
pub enum TargetField {
    #[display("title")]
    Title,
    #[display("description")]
    Description,
    #[display("short_description")]
    ShortDescription,
    #[display("price")]
    Price,
    #[display("regular_price")]
    RegularPrice,
    #[display("sale_price")]
    SalePrice,
    #[display("ean")]
    Ean,
    #[display("sku")]
    Sku,
    #[display("mpn")]
    Mpn,
    #[display("external_id")]
    ExternalId,
    #[display("image_url")]
    ImageUrl,
    #[display("gallery_images")]
    GalleryImages,
    #[display("category")]
    Category,
    #[display("brand")]
    Brand,
    #[display("manufacturer")]
    Manufacturer,
    #[display("stock_status")]
    StockStatus,
    #[display("stock_quantity")]
    StockQuantity,
    #[display("affiliate_url")]
    AffiliateUrl,
    #[display("button_text")]
    ButtonText,
    #[display("delivery_time")]
    DeliveryTime,
    /// `key:value` pairs separated by `|` or `;`
    #[display("attributes")]
    Attributes,
    #[display("attribute:{_0}")]
    Attribute(String),
}

impl std::str::FromStr for TargetField {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix("attribute:") {
            let name = name.trim();
            if name.is_empty() {
                return Err(UnknownVariant(s.to_string()));
            }
            return Ok(Self::Attribute(name.to_string()));
        }
        Ok(match s {
            "title" => Self::Title,
            "description" => Self::Description,
            "short_description" => Self::ShortDescription,
            "price" => Self::Price,
            "regular_price" => Self::RegularPrice,
            "sale_price" => Self::SalePrice,
            "ean" => Self::Ean,
            "sku" => Self::Sku,
            "mpn" => Self::Mpn,
            "external_id" => Self::ExternalId,
            "image_url" => Self::ImageUrl,
            "gallery_images" => Self::GalleryImages,
            "category" | "category_path" => Self::Category,
            "brand" => Self::Brand,
            "manufacturer" => Self::Manufacturer,
            "stock_status" => Self::StockStatus,
            "stock_quantity" => Self::StockQuantity,
            "affiliate_url" => Self::AffiliateUrl,
            "button_text" => Self::ButtonText,
            "delivery_time" => Self::DeliveryTime,
            "attributes" => Self::Attributes,
            _ => return Err(UnknownVariant(s.to_string())),
        })
    }
}
