use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::filename;
use crate::ledger::INVALID_LEDGER_DIR;
use crate::models::StoredTranscriptRecord;
use crate::storage::{path_join, BlobStore};

/// An XML file whose name does not decode. Excluded from the inventory and
/// surfaced for manual cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnparseableFile {
    pub filename: String,
    pub full_path: String,
    pub location: String,
}

/// Result of walking the stored transcript hierarchy.
#[derive(Debug, Default)]
pub struct InventoryScan {
    pub records: Vec<StoredTranscriptRecord>,
    pub unparseable: Vec<UnparseableFile>,
}

/// Walk `data_path/{fiscalYear}/{quarter}/{companyType}/{company}/*.xml` and
/// reconstruct the set of already-stored transcripts.
///
/// A missing root is the expected state before the very first sync and yields
/// an empty inventory. Undecodable filenames are collected separately and
/// reported in aggregate, never raised.
pub async fn scan(store: &dyn BlobStore, data_path: &str) -> Result<InventoryScan> {
    let mut scan = InventoryScan::default();

    if !store.exists(data_path).await {
        info!("Data path {data_path} does not exist yet, starting with an empty inventory");
        return Ok(scan);
    }

    let mut fiscal_years = store.list_dirs(data_path).await?;
    fiscal_years.retain(|year| year != INVALID_LEDGER_DIR);
    info!("Scanning stored transcripts across {} fiscal years", fiscal_years.len());

    for fiscal_year in &fiscal_years {
        let year_path = path_join(&[data_path, fiscal_year]);
        for quarter in store.list_dirs(&year_path).await? {
            let quarter_path = path_join(&[&year_path, &quarter]);
            for company_type in store.list_dirs(&quarter_path).await? {
                let type_path = path_join(&[&quarter_path, &company_type]);
                for company in store.list_dirs(&type_path).await? {
                    let company_path = path_join(&[&type_path, &company]);
                    let files = store.list_files(&company_path).await?;
                    debug!("{company_path}: {} files", files.len());

                    for file in files {
                        if !file.ends_with(".xml") {
                            continue;
                        }
                        let full_path = path_join(&[&company_path, &file]);
                        match filename::decode(&file) {
                            Some(decoded) => scan.records.push(StoredTranscriptRecord {
                                fiscal_year: fiscal_year.clone(),
                                fiscal_quarter: quarter.clone(),
                                company_type: company_type.clone(),
                                ticker: decoded.ticker,
                                transcript_type: decoded.transcript_type,
                                event_id: decoded.event_id,
                                version_id: decoded.version_id,
                                full_path,
                            }),
                            None => scan.unparseable.push(UnparseableFile {
                                filename: file.clone(),
                                full_path,
                                location: format!("{fiscal_year}/{quarter}/{company_type}/{company}"),
                            }),
                        }
                    }
                }
            }
        }
    }

    if !scan.unparseable.is_empty() {
        let sample: Vec<&str> = scan
            .unparseable
            .iter()
            .take(5)
            .map(|u| u.filename.as_str())
            .collect();
        warn!(
            "Found {} files with non-conforming names (sample: {sample:?})",
            scan.unparseable.len()
        );
    }
    info!(
        "Inventory scan complete: {} transcripts, {} unparseable filenames",
        scan.records.len(),
        scan.unparseable.len()
    );

    Ok(scan)
}
