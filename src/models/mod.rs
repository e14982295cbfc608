use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One transcript version as reported by the vendor API.
///
/// Built once at the source-adapter boundary; the rest of the system never
/// inspects raw API payloads. Within a single run, `(event_id, version_id,
/// transcript_type)` identifies a distinct transcript object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRef {
    pub ticker: String,
    pub transcript_type: String,
    pub event_id: String,
    pub version_id: String,
    pub event_date: Option<NaiveDate>,
    pub download_link: Option<String>,
    /// Identifiers the source associates with this event. Used by the
    /// contamination filter: anything other than exactly `[ticker]` means the
    /// institution is a secondary participant and the transcript is dropped.
    pub primary_ids: Vec<String>,
}

/// A transcript already persisted in the blob store, reconstructed from its
/// storage location and decoded filename.
///
/// `fiscal_year`/`fiscal_quarter` are the storage-location keys and may be
/// "Unknown" if period extraction failed at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTranscriptRecord {
    pub fiscal_year: String,
    pub fiscal_quarter: String,
    pub company_type: String,
    pub ticker: String,
    pub transcript_type: String,
    pub event_id: String,
    pub version_id: String,
    pub full_path: String,
}

/// One rejected transcript in the invalid-document ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidLedgerEntry {
    pub ticker: String,
    pub institution_name: String,
    pub event_id: String,
    pub version_id: String,
    pub title_found: String,
    pub event_date: String,
    pub transcript_type: String,
    pub reason: String,
    pub date_added: String,
}

/// Outcome of comparing one [`TranscriptRef`] against the known state.
/// Only the three `Download*` variants produce a planned fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationDecision {
    SkipInvalid,
    SkipUnchanged,
    DownloadNewEvent,
    DownloadNewType,
    DownloadVersionUpdate,
}

/// One monitored institution. The configured list order is the processing
/// order for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub ticker: String,
    pub name: String,
    #[serde(rename = "type")]
    pub company_type: String,
}

/// Inclusive date range used to bound source queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Credentials and paths sourced from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_username: String,
    pub api_password: String,
    pub api_base_url: String,
    pub base_path: String,
    pub config_path: String,
    pub http_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables. Missing credentials are
    /// fatal; everything else has a sensible default.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Ok(Config {
            api_username: std::env::var("TRANSCRIPT_API_USERNAME")
                .map_err(|_| anyhow::anyhow!("TRANSCRIPT_API_USERNAME environment variable required"))?,
            api_password: std::env::var("TRANSCRIPT_API_PASSWORD")
                .map_err(|_| anyhow::anyhow!("TRANSCRIPT_API_PASSWORD environment variable required"))?,
            api_base_url: std::env::var("TRANSCRIPT_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.example.com/events-and-transcripts/v1".to_string()),
            base_path: std::env::var("SYNC_BASE_PATH")
                .unwrap_or_else(|_| "./sync-data".to_string()),
            config_path: std::env::var("SYNC_CONFIG_PATH")
                .unwrap_or_else(|_| "config/transcript_sync.yaml".to_string()),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        })
    }
}

/// Vendor API query and retry settings from the YAML settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub transcript_types: Vec<String>,
    pub industry_categories: Vec<String>,
    pub sort_order: String,
    pub pagination_limit: u32,
    pub pagination_offset: u32,
    /// Seconds slept after every download attempt and between institutions.
    pub request_delay: f64,
    pub max_retries: u32,
    /// Base retry delay in seconds.
    pub retry_delay: f64,
    #[serde(default)]
    pub use_exponential_backoff: bool,
    #[serde(default = "default_max_backoff_delay")]
    pub max_backoff_delay: f64,
}

fn default_max_backoff_delay() -> f64 {
    120.0
}

/// Output locations and the optional fixed start year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSettings {
    pub output_data_path: String,
    pub output_logs_path: String,
    #[serde(default)]
    pub start_year: Option<i32>,
}

/// The full YAML settings document: institutions plus API and sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub institutions: Vec<Institution>,
    pub api_settings: ApiSettings,
    pub sync: StageSettings,
}

impl SyncSettings {
    /// Parse and validate the settings document. Validation failures are
    /// startup failures and abort the run before any institution is touched.
    pub fn from_yaml(bytes: &[u8]) -> anyhow::Result<Self> {
        let settings: SyncSettings =
            serde_yaml::from_slice(bytes).map_err(|e| anyhow::anyhow!("invalid settings YAML: {e}"))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.institutions.is_empty() {
            anyhow::bail!("institutions cannot be empty");
        }
        if self.api_settings.transcript_types.is_empty() {
            anyhow::bail!("api_settings.transcript_types cannot be empty");
        }
        if self.api_settings.max_retries == 0 {
            anyhow::bail!("api_settings.max_retries must be at least 1");
        }
        if let Some(start_year) = self.sync.start_year {
            let current_year = Utc::now().year();
            if !(2000..=current_year).contains(&start_year) {
                anyhow::bail!(
                    "invalid start_year {start_year}: must be between 2000 and {current_year}"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SETTINGS_YAML: &str = r#"
institutions:
  - ticker: RY-CA
    name: Royal Bank of Canada
    type: Canadian_Banks
  - ticker: TD-CA
    name: Toronto-Dominion Bank
    type: Canadian_Banks
api_settings:
  transcript_types: [Corrected, Final]
  industry_categories: ["IN:BANKS"]
  sort_order: "-storyDateTime"
  pagination_limit: 1000
  pagination_offset: 0
  request_delay: 0.5
  max_retries: 3
  retry_delay: 2.0
  use_exponential_backoff: true
  max_backoff_delay: 60.0
sync:
  output_data_path: Outputs/Data
  output_logs_path: Outputs/Logs
  start_year: 2021
"#;

    #[test]
    fn settings_parse_preserves_institution_order() {
        let settings = SyncSettings::from_yaml(SETTINGS_YAML.as_bytes()).unwrap();
        assert_eq!(settings.institutions.len(), 2);
        assert_eq!(settings.institutions[0].ticker, "RY-CA");
        assert_eq!(settings.institutions[0].company_type, "Canadian_Banks");
        assert_eq!(settings.institutions[1].ticker, "TD-CA");
        assert_eq!(settings.sync.start_year, Some(2021));
        assert!(settings.api_settings.use_exponential_backoff);
    }

    #[test]
    fn settings_reject_empty_institutions() {
        let yaml = format!(
            "institutions: []\n{}",
            SETTINGS_YAML
                .split_once("api_settings:")
                .map(|(_, rest)| format!("api_settings:{rest}"))
                .unwrap()
        );
        let err = SyncSettings::from_yaml(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("institutions"));
    }

    #[test]
    fn settings_reject_out_of_range_start_year() {
        let yaml = SETTINGS_YAML.replace("start_year: 2021", "start_year: 1995");
        let err = SyncSettings::from_yaml(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("start_year"));
    }

    #[test]
    fn backoff_cap_defaults_when_absent() {
        let yaml = SETTINGS_YAML.replace("  max_backoff_delay: 60.0\n", "");
        let settings = SyncSettings::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(settings.api_settings.max_backoff_delay, 120.0);
    }
}
