use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::models::InvalidLedgerEntry;
use crate::storage::{path_join, BlobStore};

/// Reserved pseudo-year directory holding the ledger file. The inventory
/// scanner must skip it.
pub const INVALID_LEDGER_DIR: &str = "InvalidTranscripts";
pub const INVALID_LEDGER_FILE: &str = "invalid_transcripts.csv";

/// Persisted exclusion list of transcripts rejected for non-conforming
/// titles, consulted before any re-download attempt.
///
/// Loaded once at run start and treated as the single in-memory source of
/// truth thereafter. Append-only during a run; entries are never removed
/// automatically. Not safe for concurrent runs against the same file.
pub struct InvalidLedger {
    entries: Vec<InvalidLedgerEntry>,
    path: String,
    dir: String,
}

impl InvalidLedger {
    /// Blob-store key of the ledger file under the given data path.
    pub fn ledger_path(data_path: &str) -> String {
        path_join(&[data_path, INVALID_LEDGER_DIR, INVALID_LEDGER_FILE])
    }

    /// Load the ledger from the blob store. An absent file is the expected
    /// first-run state and yields an empty ledger, not an error.
    pub async fn load(store: &dyn BlobStore, data_path: &str) -> Self {
        let dir = path_join(&[data_path, INVALID_LEDGER_DIR]);
        let path = Self::ledger_path(data_path);

        if !store.exists(&path).await {
            info!("No invalid transcript ledger found, starting with an empty one");
            return Self {
                entries: Vec::new(),
                path,
                dir,
            };
        }

        match store.read(&path).await.and_then(|bytes| Self::from_csv(&bytes)) {
            Ok(entries) => {
                info!("Loaded invalid transcript ledger with {} entries", entries.len());
                Self { entries, path, dir }
            }
            Err(e) => {
                warn!("Failed to load invalid transcript ledger, starting empty: {e:#}");
                Self {
                    entries: Vec::new(),
                    path,
                    dir,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Membership test on the string form of `(event_id, version_id)`.
    pub fn contains(&self, event_id: &str, version_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.event_id == event_id && e.version_id == version_id)
    }

    pub fn append(&mut self, entry: InvalidLedgerEntry) {
        self.entries.push(entry);
    }

    /// Persist the ledger, overwriting any prior version.
    ///
    /// Duplicate `(event_id, version_id)` rows collapse at save time, first
    /// occurrence wins, so repeated rejections across runs cannot accumulate
    /// duplicate rows in the persisted table. The caller decides whether a
    /// save failure matters; the in-memory table stays authoritative either
    /// way.
    pub async fn save(&self, store: &dyn BlobStore) -> Result<()> {
        store
            .mkdir_recursive(&self.dir)
            .await
            .with_context(|| format!("creating ledger directory {}", self.dir))?;

        let bytes = self.to_csv()?;
        store
            .write(&self.path, &bytes)
            .await
            .with_context(|| format!("writing ledger {}", self.path))?;

        info!(
            "Saved invalid transcript ledger with {} entries to {}",
            self.len(),
            self.path
        );
        Ok(())
    }

    fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for entry in &self.entries {
            if seen.insert((entry.event_id.as_str(), entry.version_id.as_str())) {
                writer.serialize(entry).context("serializing ledger entry")?;
            }
        }
        writer.flush().context("flushing ledger csv")?;
        writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("finalizing ledger csv: {}", e.error()))
    }

    fn from_csv(bytes: &[u8]) -> Result<Vec<InvalidLedgerEntry>> {
        let mut reader = csv::Reader::from_reader(bytes);
        let mut entries = Vec::new();
        for row in reader.deserialize() {
            entries.push(row.context("reading ledger row")?);
        }
        Ok(entries)
    }
}
