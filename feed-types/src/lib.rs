use derive_more::Display;
use serde::{Deserialize, Serialize};

pub mod category;
pub mod feed;
pub mod history;
pub mod item;
pub mod product;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[display("xml")]
    Xml,
    #[display("csv")]
    Csv,
    #[display("json")]
    Json,
}

impl std::str::FromStr for FeedFormat {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    #[default]
    #[display("create_update")]
    CreateUpdate,
    #[display("create_only")]
    CreateOnly,
    #[display("update_only")]
    UpdateOnly,
}

impl ImportMode {
    pub fn creates(&self) -> bool {
        !matches!(self, Self::UpdateOnly)
    }
    pub fn updates(&self) -> bool {
        !matches!(self, Self::CreateOnly)
    }
}

/// Product attribute used to find the stored product an incoming item corresponds to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "snake_case")]
pub enum MatchKey {
    #[default]
    #[display("ean")]
    Ean,
    #[display("sku")]
    Sku,
    #[display("external_id")]
    ExternalId,
    #[display("title")]
    Title,
}

impl MatchKey {
    pub fn value<'a>(&self, item: &'a item::FeedItem) -> Option<&'a str> {
        let v = match self {
            Self::Ean => item.ean.as_deref(),
            Self::Sku => item.sku.as_deref(),
            Self::ExternalId => item.external_id.as_deref(),
            Self::Title => Some(item.title.as_str()),
        };
        v.map(str::trim).filter(|v| !v.is_empty())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    #[default]
    #[display("active")]
    Active,
    #[display("running")]
    Running,
    #[display("error")]
    Error,
    #[display("paused")]
    Paused,
}

impl std::str::FromStr for FeedStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "running" => Ok(Self::Running),
            "error" => Ok(Self::Error),
            "paused" => Ok(Self::Paused),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    #[default]
    #[display("idle")]
    Idle,
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
    #[display("cancelled")]
    Cancelled,
}

impl ImportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("Unknown variant: {_0}")]
pub struct UnknownVariant(pub String);

impl std::error::Error for UnknownVariant {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_text() {
        for s in [
            ImportStatus::Idle,
            ImportStatus::Running,
            ImportStatus::Completed,
            ImportStatus::Failed,
            ImportStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<ImportStatus>(), Ok(s));
        }
        assert_eq!("error".parse::<FeedStatus>(), Ok(FeedStatus::Error));
        assert!("broken".parse::<FeedStatus>().is_err());
    }

    #[test]
    fn import_mode_permissions() {
        assert!(ImportMode::CreateUpdate.creates() && ImportMode::CreateUpdate.updates());
        assert!(!ImportMode::CreateOnly.updates());
        assert!(!ImportMode::UpdateOnly.creates());
    }

    #[test]
    fn match_key_ignores_blank_identifiers() {
        let item = item::FeedItem {
            title: "Phone".to_string(),
            ean: Some("  ".to_string()),
            sku: Some("SKU-1".to_string()),
            ..Default::default()
        };
        assert_eq!(MatchKey::Ean.value(&item), None);
        assert_eq!(MatchKey::Sku.value(&item), Some("SKU-1"));
        assert_eq!(MatchKey::Title.value(&item), Some("Phone"));
    }
}
