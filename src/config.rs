use anyhow::anyhow;
use feed_types::feed::FeedConfig;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "FeedImport/1.0";
pub const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_PREVIEW_BYTES: u64 = 100 * 1024;

#[derive(Debug, Clone)]
pub struct ImporterSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: u64,
    pub preview_bytes: u64,
    pub preview_timeout: Duration,
    pub progress_every: usize,
    pub log_capacity: usize,
    pub history_limit: usize,
}

impl Default for ImporterSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(5 * 60),
            max_bytes: DEFAULT_MAX_BYTES,
            preview_bytes: DEFAULT_PREVIEW_BYTES,
            preview_timeout: Duration::from_secs(30),
            progress_every: 50,
            log_capacity: 100,
            history_limit: 20,
        }
    }
}

impl ImporterSettings {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            user_agent: envmnt::get_or("IMPORT_USER_AGENT", &default.user_agent),
            timeout: env_duration("IMPORT_TIMEOUT").unwrap_or(default.timeout),
            max_bytes: envmnt::get_parse("IMPORT_MAX_BYTES").unwrap_or(default.max_bytes),
            preview_bytes: envmnt::get_parse("IMPORT_PREVIEW_BYTES")
                .unwrap_or(default.preview_bytes),
            preview_timeout: env_duration("IMPORT_PREVIEW_TIMEOUT")
                .unwrap_or(default.preview_timeout),
            progress_every: envmnt::get_parse("IMPORT_PROGRESS_EVERY")
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(default.progress_every),
            log_capacity: envmnt::get_parse("IMPORT_LOG_CAPACITY")
                .unwrap_or(default.log_capacity),
            history_limit: envmnt::get_parse("IMPORT_HISTORY_LIMIT")
                .unwrap_or(default.history_limit),
        }
    }
}

fn env_duration(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match parse_duration(&raw) {
        Ok(d) => Some(d),
        Err(err) => {
            log::warn!("Ignoring {key}: {err}");
            None
        }
    }
}

pub fn parse_duration(duration: &str) -> Result<Duration, anyhow::Error> {
    let duration = duration.trim().to_lowercase().replace(' ', "");
    duration_str::parse(&duration)
        .map_err(|err| anyhow!("Unable to parse duration {duration}: {err}"))
}

pub fn read_feeds<P: AsRef<std::path::Path>>(path: P) -> Result<Vec<FeedConfig>, anyhow::Error> {
    let file = std::fs::File::open(path.as_ref())
        .map_err(|err| anyhow!("Unable to open {}: {err}", path.as_ref().display()))?;
    Ok(serde_yaml::from_reader(std::io::BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_durations() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration(" 30S ").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn feeds_load_from_yaml() {
        let yaml = r#"
- id: 0f8fad5b-d9cb-469f-a165-70867728950e
  name: Heureka
  url: https://example.com/heureka.xml
  format: xml
  import_mode: create_only
  match_by: sku
  field_mappings:
    - source_field: PRODUCTNAME
      target_field: title
    - source_field: PARAM_COLOR
      target_field: "attribute:Color"
"#;
        let feeds: Vec<FeedConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].field_mappings.len(), 2);
        assert_eq!(feeds[0].import_mode, feed_types::ImportMode::CreateOnly);
    }
}
