use crate::error::ItemError;
use feed_types::feed::{FeedConfig, FieldMapping, PriceLocale, TargetField, TransformType};
use feed_types::item::{FeedItem, RawRecord, MULTI_VALUE_SEPARATOR};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

pub const REGEX_SEPARATOR: &str = "|||";
pub const AUTO_CONFIDENCE: f32 = 0.9;

const TITLE_KEYS: &[&str] = &["PRODUCTNAME", "title", "name", "nazov"];
const DESCRIPTION_KEYS: &[&str] = &["DESCRIPTION", "description", "popis"];
const PRICE_KEYS: &[&str] = &["PRICE_VAT", "price", "cena"];
const EAN_KEYS: &[&str] = &["EAN", "ean", "ean13", "gtin"];
const SKU_KEYS: &[&str] = &["SKU", "sku", "ITEMGROUP_ID", "kod"];
const EXTERNAL_ID_KEYS: &[&str] = &["ITEM_ID", "external_id", "id"];
const IMAGE_KEYS: &[&str] = &["IMGURL", "image", "image_url", "img_url"];
const GALLERY_KEYS: &[&str] = &["IMGURL_ALTERNATIVE", "gallery", "images"];
const CATEGORY_KEYS: &[&str] = &["CATEGORYTEXT", "category", "kategoria"];
const BRAND_KEYS: &[&str] = &["MANUFACTURER", "brand", "vyrobca"];
const URL_KEYS: &[&str] = &["URL", "url", "link"];
const DELIVERY_KEYS: &[&str] = &["DELIVERY_DATE", "delivery", "dodanie"];

struct Rule {
    mapping: FieldMapping,
    regex: Option<(Regex, String)>,
}

impl Rule {
    fn compile(mapping: &FieldMapping) -> Self {
        let regex = match (mapping.transform, mapping.transform_value.as_deref()) {
            (Some(TransformType::Regex), Some(payload)) => {
                match payload.split_once(REGEX_SEPARATOR) {
                    Some((pattern, replacement)) => match Regex::new(pattern) {
                        Ok(re) => Some((re, replacement.to_string())),
                        Err(err) => {
                            log::warn!(
                                "Ignoring regex transform of {}: {err}",
                                mapping.source_field
                            );
                            None
                        }
                    },
                    None => {
                        log::warn!(
                            "Regex transform of {} lacks a {REGEX_SEPARATOR} separator",
                            mapping.source_field
                        );
                        None
                    }
                }
            }
            _ => None,
        };
        Self {
            mapping: mapping.clone(),
            regex,
        }
    }

    fn transform(&self, value: String) -> String {
        match self.mapping.transform {
            None => value,
            Some(TransformType::Trim) => value.trim().to_string(),
            Some(TransformType::Lowercase) => value.to_lowercase(),
            Some(TransformType::Uppercase) => value.to_uppercase(),
            Some(TransformType::Regex) => match &self.regex {
                Some((re, replacement)) => {
                    re.replace_all(&value, replacement.as_str()).into_owned()
                }
                None => value,
            },
            Some(TransformType::Default) => {
                if value.trim().is_empty() {
                    self.mapping.transform_value.clone().unwrap_or(value)
                } else {
                    value
                }
            }
        }
    }
}

/// Converts raw records into [`FeedItem`]s using explicit mappings, or alias
/// heuristics when none are configured.
pub struct Mapper {
    rules: Vec<Rule>,
    price_locale: PriceLocale,
    default_category: Option<String>,
}

impl Mapper {
    pub fn new(mappings: &[FieldMapping]) -> Self {
        Self {
            rules: mappings.iter().map(Rule::compile).collect(),
            price_locale: PriceLocale::default(),
            default_category: None,
        }
    }

    pub fn for_feed(feed: &FeedConfig) -> Self {
        Self {
            price_locale: feed.price_locale,
            default_category: feed
                .default_category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            ..Self::new(&feed.field_mappings)
        }
    }

    pub fn is_automatic(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn map_item(&self, raw: &RawRecord) -> Result<FeedItem, ItemError> {
        let mut item = if self.is_automatic() {
            self.map_automatic(raw)
        } else {
            self.map_explicit(raw)?
        };
        item.title = item.title.trim().to_string();
        if item.title.is_empty() {
            return Err(ItemError::MissingTitle);
        }
        if item.category_path.is_none() {
            item.category_path = self.default_category.clone();
        }
        Ok(item)
    }

    fn map_explicit(&self, raw: &RawRecord) -> Result<FeedItem, ItemError> {
        let mut item = FeedItem::default();
        for rule in &self.rules {
            let m = &rule.mapping;
            let mut value = raw.lookup(&m.source_field).unwrap_or_default().to_string();
            if value.trim().is_empty() {
                if let Some(default) = &m.default_value {
                    value = default.clone();
                }
            }
            let value = rule.transform(value);
            if m.required && value.trim().is_empty() {
                return Err(ItemError::MissingRequired(m.source_field.clone()));
            }
            // later mappings overwrite earlier ones, blank values included
            self.assign(&mut item, &m.target_field, value);
        }
        Ok(item)
    }

    fn map_automatic(&self, raw: &RawRecord) -> FeedItem {
        let get = |keys: &[&str]| raw.lookup_any(keys).map(|v| v.trim().to_string());
        FeedItem {
            title: get(TITLE_KEYS).unwrap_or_default(),
            description: get(DESCRIPTION_KEYS),
            price: get(PRICE_KEYS)
                .map(|p| parse_price(&p, self.price_locale))
                .unwrap_or_default(),
            ean: get(EAN_KEYS),
            sku: get(SKU_KEYS),
            external_id: get(EXTERNAL_ID_KEYS),
            image_url: get(IMAGE_KEYS),
            gallery_images: get(GALLERY_KEYS).map(|g| split_multi(&g)).unwrap_or_default(),
            category_path: get(CATEGORY_KEYS),
            brand: get(BRAND_KEYS),
            affiliate_url: get(URL_KEYS),
            delivery_time: get(DELIVERY_KEYS),
            ..Default::default()
        }
    }

    fn assign(&self, item: &mut FeedItem, target: &TargetField, value: String) {
        let price = |v: &str| Some(parse_price(v, self.price_locale)).filter(|p| !p.is_zero());
        match target {
            TargetField::Title => item.title = value,
            TargetField::Description => item.description = non_empty(value),
            TargetField::ShortDescription => item.short_description = non_empty(value),
            TargetField::Price => item.price = parse_price(&value, self.price_locale),
            TargetField::RegularPrice => item.regular_price = price(&value),
            TargetField::SalePrice => item.sale_price = price(&value),
            TargetField::Ean => item.ean = non_empty(value),
            TargetField::Sku => item.sku = non_empty(value),
            TargetField::Mpn => item.mpn = non_empty(value),
            TargetField::ExternalId => item.external_id = non_empty(value),
            TargetField::ImageUrl => item.image_url = non_empty(value),
            TargetField::GalleryImages => item.gallery_images = split_multi(&value),
            TargetField::Category => item.category_path = non_empty(value),
            TargetField::Brand => item.brand = non_empty(value),
            TargetField::Manufacturer => item.manufacturer = non_empty(value),
            TargetField::StockStatus => item.stock_status = non_empty(value),
            TargetField::StockQuantity => item.stock_quantity = parse_quantity(&value),
            TargetField::AffiliateUrl => item.affiliate_url = non_empty(value),
            TargetField::ButtonText => item.button_text = non_empty(value),
            TargetField::DeliveryTime => item.delivery_time = non_empty(value),
            TargetField::Attributes => item.attributes.extend(parse_attributes(&value)),
            TargetField::Attribute(name) => {
                if let Some(value) = non_empty(value) {
                    item.attributes.insert(name.clone(), value);
                }
            }
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn split_multi(value: &str) -> Vec<String> {
    value
        .split(MULTI_VALUE_SEPARATOR)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_quantity(value: &str) -> Option<i64> {
    let value = value.trim();
    value
        .parse::<i64>()
        .ok()
        .or_else(|| Decimal::from_str(value).ok().and_then(|d| d.trunc().to_i64()))
}

/// `key:value` pairs separated by `|` or `;`.
fn parse_attributes(value: &str) -> Vec<(String, String)> {
    value
        .split(['|', ';'])
        .filter_map(|pair| pair.split_once([':', '=']))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

/// Zero when nothing numeric remains. Under [`PriceLocale::Legacy`] a comma used as a
/// thousands separator cannot be told apart from a decimal comma.
pub fn parse_price(raw: &str, locale: PriceLocale) -> Decimal {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if kept.is_empty() {
        return Decimal::ZERO;
    }
    let normalised = match locale {
        PriceLocale::Legacy => kept.replace(',', "."),
        PriceLocale::Comma => kept.replace('.', "").replace(',', "."),
        PriceLocale::Period => kept.replace(',', ""),
    };
    match Decimal::from_str(&normalised) {
        Ok(price) => price,
        Err(_) => {
            log::warn!("Unable to parse price {raw:?} as {locale}, using 0");
            Decimal::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoMapping {
    pub source_field: String,
    pub target_field: TargetField,
    pub confidence: f32,
}

const AUTO_RULES: &[(TargetField, &[&str])] = &[
    (TargetField::Ean, &["ean", "ean13", "gtin", "barcode", "item_id"]),
    (TargetField::Sku, &["sku", "productno", "kod", "item_id", "itemgroup_id"]),
    (TargetField::ExternalId, &["id", "external_id", "ext_id"]),
    (TargetField::Title, &["productname", "product", "title", "name", "nazov"]),
    (TargetField::Description, &["description", "popis", "desc"]),
    (TargetField::Price, &["price_vat", "price", "cena"]),
    (TargetField::ImageUrl, &["imgurl", "img_url", "image", "foto"]),
    (TargetField::GalleryImages, &["imgurl_alternative", "gallery", "images"]),
    (TargetField::AffiliateUrl, &["url", "link", "product_url"]),
    (TargetField::Category, &["categorytext", "category", "kategoria"]),
    (TargetField::Brand, &["manufacturer", "brand", "vyrobca"]),
    (TargetField::StockQuantity, &["stock", "quantity", "sklad"]),
    (TargetField::DeliveryTime, &["delivery", "delivery_date", "dodanie"]),
    (TargetField::Attributes, &["param", "params"]),
];

/// Guesses a target for each source field by case-insensitive name. A field maps to at
/// most one target. A field named exactly like a target claims it first; remaining
/// targets go to the first field whose name is one of their aliases.
pub fn auto_detect_mappings<S: AsRef<str>>(fields: &[S]) -> Vec<AutoMapping> {
    let names: Vec<String> = fields
        .iter()
        .map(|f| f.as_ref().trim().to_lowercase())
        .collect();
    let mut claimed = vec![false; AUTO_RULES.len()];
    let mut assigned: Vec<Option<usize>> = vec![None; names.len()];
    for (field, lower) in names.iter().enumerate() {
        let exact = AUTO_RULES
            .iter()
            .position(|(target, _)| target.to_string() == *lower);
        if let Some(idx) = exact.filter(|idx| !claimed[*idx]) {
            claimed[idx] = true;
            assigned[field] = Some(idx);
        }
    }
    for (field, lower) in names.iter().enumerate() {
        if assigned[field].is_some() {
            continue;
        }
        let alias = AUTO_RULES
            .iter()
            .enumerate()
            .position(|(idx, (_, aliases))| !claimed[idx] && aliases.contains(&lower.as_str()));
        if let Some(idx) = alias {
            claimed[idx] = true;
            assigned[field] = Some(idx);
        }
    }
    fields
        .iter()
        .zip(assigned)
        .filter_map(|(field, idx)| {
            Some(AutoMapping {
                source_field: field.as_ref().to_string(),
                target_field: AUTO_RULES[idx?].0.clone(),
                confidence: AUTO_CONFIDENCE,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(pairs: &[(&str, &str)]) -> RawRecord {
        pairs.iter().copied().collect()
    }

    fn mapping(source: &str, target: TargetField) -> FieldMapping {
        FieldMapping::new(source, target)
    }

    #[test]
    fn automatic_mapping_uses_aliases() {
        let raw = record(&[
            ("PRODUCTNAME", "Kettle"),
            ("PRICE_VAT", "24,90"),
            ("EAN", "8590000000001"),
            ("CATEGORYTEXT", "Home | Kitchen"),
            ("IMGURL_ALTERNATIVE", "a.jpg|b.jpg"),
            ("URL", "https://shop/kettle"),
        ]);
        let item = Mapper::new(&[]).map_item(&raw).unwrap();
        assert_eq!(item.title, "Kettle");
        assert_eq!(item.price, dec!(24.90));
        assert_eq!(item.ean.as_deref(), Some("8590000000001"));
        assert_eq!(item.category_path.as_deref(), Some("Home | Kitchen"));
        assert_eq!(item.gallery_images, vec!["a.jpg", "b.jpg"]);
        assert_eq!(item.affiliate_url.as_deref(), Some("https://shop/kettle"));
    }

    #[test]
    fn missing_title_rejects_record() {
        let raw = record(&[("price", "10")]);
        assert!(matches!(Mapper::new(&[]).map_item(&raw), Err(ItemError::MissingTitle)));
        let mapper = Mapper::new(&[mapping("name", TargetField::Title)]);
        assert!(matches!(
            mapper.map_item(&record(&[("name", "   ")])),
            Err(ItemError::MissingTitle)
        ));
    }

    #[test]
    fn explicit_mappings_apply_in_order_with_fallbacks() {
        let mut name = mapping("Name", TargetField::Title);
        name.transform = Some(TransformType::Trim);
        let mut price = mapping("cost", TargetField::Price);
        price.default_value = Some("5".to_string());
        let override_title = mapping("alt_title", TargetField::Title);
        let mut stock = mapping("STOCK", TargetField::StockQuantity);
        stock.transform = Some(TransformType::Default);
        stock.transform_value = Some("0".to_string());
        let mapper = Mapper::new(&[name, price, override_title, stock]);

        let item = mapper
            .map_item(&record(&[("name", "  Lamp "), ("alt_title", "Desk lamp")]))
            .unwrap();
        assert_eq!(item.title, "Desk lamp");
        assert_eq!(item.price, dec!(5));
        assert_eq!(item.stock_quantity, Some(0));
    }

    #[test]
    fn blank_later_mapping_overwrites_earlier_value() {
        let name = mapping("name", TargetField::Title);
        let alt_title = mapping("alt_title", TargetField::Title);
        let first_ean = mapping("ean", TargetField::Ean);
        let second_ean = mapping("gtin", TargetField::Ean);

        let mapper = Mapper::new(&[name.clone(), alt_title]);
        let res = mapper.map_item(&record(&[("name", "Lamp"), ("alt_title", "")]));
        assert!(matches!(res, Err(ItemError::MissingTitle)));

        let item = Mapper::new(&[name, first_ean, second_ean])
            .map_item(&record(&[("name", "Lamp"), ("ean", "859")]))
            .unwrap();
        assert_eq!(item.ean, None);
    }

    #[test]
    fn transforms_change_case_and_substitute() {
        let mut upper = mapping("sku", TargetField::Sku);
        upper.transform = Some(TransformType::Uppercase);
        let mut lower = mapping("brand", TargetField::Brand);
        lower.transform = Some(TransformType::Lowercase);
        let mut regex = mapping("title", TargetField::Title);
        regex.transform = Some(TransformType::Regex);
        regex.transform_value = Some(r"\s*\(.*\)$|||".to_string());
        let mut swap = mapping("size", TargetField::Attribute("Size".to_string()));
        swap.transform = Some(TransformType::Regex);
        swap.transform_value = Some(r"(\d+)x(\d+)|||$2 x $1".to_string());
        let mapper = Mapper::new(&[upper, lower, regex, swap]);
        let item = mapper
            .map_item(&record(&[
                ("sku", "ab-12"),
                ("brand", "ACME"),
                ("title", "Chair (old model)"),
                ("size", "40x60"),
            ]))
            .unwrap();
        assert_eq!(item.sku.as_deref(), Some("AB-12"));
        assert_eq!(item.brand.as_deref(), Some("acme"));
        assert_eq!(item.title, "Chair");
        assert_eq!(item.attributes.get("Size").map(String::as_str), Some("60 x 40"));
    }

    #[test]
    fn invalid_regex_leaves_value_untouched() {
        let mut broken = mapping("title", TargetField::Title);
        broken.transform = Some(TransformType::Regex);
        broken.transform_value = Some("([|||x".to_string());
        let item = Mapper::new(&[broken]).map_item(&record(&[("title", "Sofa")])).unwrap();
        assert_eq!(item.title, "Sofa");
    }

    #[test]
    fn required_mapping_rejects_empty_value() {
        let title = mapping("title", TargetField::Title);
        let mut ean = mapping("ean", TargetField::Ean);
        ean.required = true;
        let res = Mapper::new(&[title, ean]).map_item(&record(&[("title", "Sofa")]));
        assert!(matches!(res, Err(ItemError::MissingRequired(f)) if f == "ean"));
    }

    #[test]
    fn attributes_and_gallery_targets() {
        let title = mapping("title", TargetField::Title);
        let params = mapping("params", TargetField::Attributes);
        let gallery = mapping("images", TargetField::GalleryImages);
        let item = Mapper::new(&[title, params, gallery])
            .map_item(&record(&[
                ("title", "Sofa"),
                ("params", "Color: Grey; Seats=3|broken"),
                ("images", " a.jpg || b.jpg "),
            ]))
            .unwrap();
        assert_eq!(item.attributes.len(), 2);
        assert_eq!(item.attributes["Color"], "Grey");
        assert_eq!(item.attributes["Seats"], "3");
        assert_eq!(item.gallery_images, vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn default_category_fills_missing_path() {
        let mut feed = FeedConfig::new("f", "https://example.com");
        feed.default_category = Some("Misc".to_string());
        let item = Mapper::for_feed(&feed)
            .map_item(&record(&[("title", "Sofa")]))
            .unwrap();
        assert_eq!(item.category_path.as_deref(), Some("Misc"));
    }

    #[test]
    fn price_parsing_by_locale() {
        assert_eq!(parse_price("19,99 EUR", PriceLocale::Legacy), dec!(19.99));
        assert_eq!(parse_price("19.99", PriceLocale::Legacy), dec!(19.99));
        assert_eq!(parse_price("1,234.56", PriceLocale::Legacy), Decimal::ZERO);
        assert_eq!(parse_price("n/a", PriceLocale::Legacy), Decimal::ZERO);
        assert_eq!(parse_price("1.234,56 Kč", PriceLocale::Comma), dec!(1234.56));
        assert_eq!(parse_price("$1,234.56", PriceLocale::Period), dec!(1234.56));
    }

    #[test]
    fn auto_detect_assigns_each_target_once() {
        let fields = [
            "ITEM_ID",
            "PRODUCTNAME",
            "PRODUCT",
            "Price_Vat",
            "IMGURL",
            "IMGURL_ALTERNATIVE",
            "CATEGORYTEXT",
            "unknown",
            "ITEMGROUP_ID",
        ];
        let mappings = auto_detect_mappings(&fields);
        let targets: Vec<_> = mappings
            .iter()
            .map(|m| (m.source_field.as_str(), m.target_field.to_string()))
            .collect();
        assert_eq!(
            targets,
            vec![
                ("ITEM_ID", "ean".to_string()),
                ("PRODUCTNAME", "title".to_string()),
                ("Price_Vat", "price".to_string()),
                ("IMGURL", "image_url".to_string()),
                ("IMGURL_ALTERNATIVE", "gallery_images".to_string()),
                ("CATEGORYTEXT", "category".to_string()),
                ("ITEMGROUP_ID", "sku".to_string()),
            ]
        );
        assert!(mappings.iter().all(|m| m.confidence == AUTO_CONFIDENCE));
    }

    #[test]
    fn exact_target_name_beats_an_earlier_alias() {
        let mappings = auto_detect_mappings(&["ITEM_ID", "PRODUCTNAME", "EAN", "ITEMGROUP_ID"]);
        let targets: Vec<_> = mappings
            .iter()
            .map(|m| (m.source_field.as_str(), m.target_field.clone()))
            .collect();
        assert_eq!(
            targets,
            vec![
                ("ITEM_ID", TargetField::Sku),
                ("PRODUCTNAME", TargetField::Title),
                ("EAN", TargetField::Ean),
            ]
        );
    }
}
