use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::api::{RateLimiter, RetryPolicy, TranscriptSource};
use crate::filename;
use crate::inventory;
use crate::ledger::InvalidLedger;
use crate::models::{
    DateWindow, Institution, InvalidLedgerEntry, StoredTranscriptRecord, SyncSettings,
    TranscriptRef,
};
use crate::reconcile;
use crate::storage::{path_join, BlobStore};
use crate::title;
use crate::utils::{calculate_window, sanitize_company_name};

/// Reason recorded in the ledger for every title rejection.
pub const REJECTION_REASON: &str = "Title format not 'Qx 20xx Earnings Call'";

/// Per-institution processing stages. Used to label errors in the run
/// summary; a failed institution never aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Querying,
    Filtering,
    Comparing,
    Downloading,
    PersistingLedger,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Querying => "querying",
            Stage::Filtering => "filtering",
            Stage::Comparing => "comparing",
            Stage::Downloading => "downloading",
            Stage::PersistingLedger => "persisting_ledger",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

/// One recorded per-institution failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub institution: String,
    pub stage: String,
    pub message: String,
}

impl RunError {
    fn new(institution: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            institution: institution.to_string(),
            stage: stage.as_str().to_string(),
            message: message.into(),
        }
    }
}

/// Statistics for one full run, handed to the caller and persisted as JSON
/// under the logs path.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: String,
    pub total_institutions: usize,
    pub failed_institutions: usize,
    pub transcript_files_found: usize,
    pub unparseable_files: usize,
    pub downloaded: usize,
    pub added_to_invalid_ledger: usize,
    pub invalid_ledger_size: usize,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub execution_time_seconds: f64,
    pub errors: Vec<RunError>,
}

/// Result of processing one institution, for logging and aggregation.
#[derive(Debug)]
struct InstitutionOutcome {
    stage: Stage,
    api_transcripts: usize,
    existing: usize,
    planned: usize,
    downloaded: usize,
    rejected: usize,
    skipped_invalid: usize,
}

enum DownloadOutcome {
    Stored(String),
    Rejected(String),
    Unavailable,
}

/// Drives the per-institution sync loop: query, filter, compare, download,
/// persist ledger increments, accumulate statistics.
pub struct SyncOrchestrator<'a> {
    store: &'a dyn BlobStore,
    source: &'a dyn TranscriptSource,
    settings: &'a SyncSettings,
    retry: RetryPolicy,
    pacer: RateLimiter,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        source: &'a dyn TranscriptSource,
        settings: &'a SyncSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            retry: RetryPolicy::from_settings(&settings.api_settings),
            pacer: RateLimiter::new(settings.api_settings.request_delay),
        }
    }

    /// Run one full sync. Only startup failures (data root provisioning,
    /// inventory scan against an unreachable store) return `Err`; everything
    /// per-institution degrades into summary statistics.
    pub async fn run(&self, today: NaiveDate) -> Result<RunSummary> {
        let started = Instant::now();
        let window = calculate_window(self.settings.sync.start_year, today);
        let data_path = &self.settings.sync.output_data_path;

        self.store
            .mkdir_recursive(data_path)
            .await
            .with_context(|| format!("creating data root {data_path}"))?;

        let mut ledger = InvalidLedger::load(self.store, data_path).await;
        let initial_ledger_len = ledger.len();

        let scan = inventory::scan(self.store, data_path)
            .await
            .context("scanning stored transcript inventory")?;

        let mut errors: Vec<RunError> = Vec::new();
        let mut downloaded_total = 0usize;
        let mut failed_institutions = 0usize;
        let total = self.settings.institutions.len();

        for (index, institution) in self.settings.institutions.iter().enumerate() {
            let outcome = self
                .sync_institution(institution, window, &scan.records, &mut ledger, &mut errors)
                .await;

            downloaded_total += outcome.downloaded;
            if outcome.stage == Stage::Failed {
                failed_institutions += 1;
            }

            info!(
                "{} ({}/{}): {} API transcripts | Downloaded: {}/{} valid | Existing: {} | Rejected: {} invalid | Previously rejected: {}",
                institution.ticker,
                index + 1,
                total,
                outcome.api_transcripts,
                outcome.downloaded,
                outcome.planned,
                outcome.existing,
                outcome.rejected,
                outcome.skipped_invalid,
            );

            if index + 1 < total {
                self.pacer.wait().await;
            }
        }

        // Covers rejections whose incremental save failed, and the case where
        // only earlier institutions added entries.
        if ledger.len() > initial_ledger_len {
            if let Err(e) = ledger.save(self.store).await {
                warn!("Final ledger save failed: {e:#}");
                errors.push(RunError::new("*", Stage::PersistingLedger, format!("{e:#}")));
            }
        }

        let added = ledger.len() - initial_ledger_len;
        info!(
            "Transcript sync complete: {downloaded_total} downloaded, {added} added to invalid ledger"
        );

        Ok(RunSummary {
            status: "completed".to_string(),
            total_institutions: total,
            failed_institutions,
            transcript_files_found: scan.records.len(),
            unparseable_files: scan.unparseable.len(),
            downloaded: downloaded_total,
            added_to_invalid_ledger: added,
            invalid_ledger_size: ledger.len(),
            window_start: window.start,
            window_end: window.end,
            execution_time_seconds: started.elapsed().as_secs_f64(),
            errors,
        })
    }

    async fn sync_institution(
        &self,
        institution: &Institution,
        window: DateWindow,
        all_stored: &[StoredTranscriptRecord],
        ledger: &mut InvalidLedger,
        errors: &mut Vec<RunError>,
    ) -> InstitutionOutcome {
        let ticker = &institution.ticker;
        let mut outcome = InstitutionOutcome {
            stage: Stage::Querying,
            api_transcripts: 0,
            existing: 0,
            planned: 0,
            downloaded: 0,
            rejected: 0,
            skipped_invalid: 0,
        };

        let api_refs = self.query_with_retry(ticker, window, errors).await;

        // Only the configured transcript types take part in reconciliation.
        outcome.stage = Stage::Filtering;
        let allowed = &self.settings.api_settings.transcript_types;
        let typed: Vec<TranscriptRef> = api_refs
            .into_iter()
            .filter(|t| allowed.iter().any(|ty| *ty == t.transcript_type))
            .collect();
        outcome.api_transcripts = typed.len();

        let stored: Vec<StoredTranscriptRecord> = all_stored
            .iter()
            .filter(|r| r.ticker == *ticker && r.company_type == institution.company_type)
            .cloned()
            .collect();
        outcome.existing = stored.len();

        outcome.stage = Stage::Comparing;
        let plan = reconcile::plan(ticker, typed, &stored, ledger);
        outcome.planned = plan.to_download.len();
        outcome.skipped_invalid = plan.log.skipped_invalid;
        info!(
            "{ticker}: planned {} downloads ({} new events, {} new types, {} version updates, {} contaminated dropped)",
            plan.to_download.len(),
            plan.log.new_events,
            plan.log.new_transcript_types,
            plan.log.version_updates,
            plan.log.contamination_rejected,
        );

        outcome.stage = Stage::Downloading;
        for candidate in &plan.to_download {
            let result = self
                .download_one(institution, candidate, ledger, errors)
                .await;

            // Rate limit applies after every attempt, success or failure.
            self.pacer.wait().await;

            match result {
                Ok(DownloadOutcome::Stored(file_name)) => {
                    outcome.downloaded += 1;
                    info!("Downloaded valid transcript: {file_name}");
                }
                Ok(DownloadOutcome::Rejected(found_title)) => {
                    outcome.rejected += 1;
                    info!("Rejected transcript for {ticker}: {found_title}");
                }
                Ok(DownloadOutcome::Unavailable) => {}
                Err(e) => {
                    error!("Aborting {ticker} after unrecoverable error: {e:#}");
                    errors.push(RunError::new(ticker, Stage::Downloading, format!("{e:#}")));
                    outcome.stage = Stage::Failed;
                    break;
                }
            }
        }

        if outcome.rejected > 0 {
            info!(
                "Saving {} new invalid entries for {ticker} to the ledger",
                outcome.rejected
            );
            if let Err(e) = ledger.save(self.store).await {
                warn!("Ledger save failed for {ticker}, entries retained in memory: {e:#}");
                errors.push(RunError::new(ticker, Stage::PersistingLedger, format!("{e:#}")));
            }
        }

        if outcome.stage != Stage::Failed {
            outcome.stage = Stage::Done;
        }
        outcome
    }

    /// Query the source with bounded retry. Exhaustion degrades to an empty
    /// list for this institution; the failure lands in the error list.
    async fn query_with_retry(
        &self,
        ticker: &str,
        window: DateWindow,
        errors: &mut Vec<RunError>,
    ) -> Vec<TranscriptRef> {
        let max = self.retry.max_retries;
        for attempt in 0..max {
            match self.source.fetch_transcripts(ticker, window).await {
                Ok(refs) => return refs,
                Err(e) if attempt + 1 < max => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Query attempt {} failed for {ticker}, retrying in {:.1}s: {e}",
                        attempt + 1,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("All {max} query attempts failed for {ticker}: {e}");
                    errors.push(RunError::new(ticker, Stage::Querying, e.to_string()));
                }
            }
        }
        Vec::new()
    }

    /// Fetch one document with bounded retry. `None` means the transcript is
    /// unavailable this run; the failure is already recorded.
    async fn download_with_retry(
        &self,
        ticker: &str,
        candidate: &TranscriptRef,
        errors: &mut Vec<RunError>,
    ) -> Option<Vec<u8>> {
        let max = self.retry.max_retries;
        for attempt in 0..max {
            match self.source.download(candidate).await {
                Ok(bytes) => return Some(bytes),
                Err(e) if attempt + 1 < max => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Download attempt {} failed for {ticker} event {}, retrying in {:.1}s: {e}",
                        attempt + 1,
                        candidate.event_id,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "All {max} download attempts failed for {ticker} event {}: {e}",
                        candidate.event_id
                    );
                    errors.push(RunError::new(ticker, Stage::Downloading, e.to_string()));
                }
            }
        }
        None
    }

    /// Download, validate, and either store or ledger one transcript.
    ///
    /// Returns `Err` only for failures that abort the institution, such as
    /// directory provisioning or a failed archive write.
    async fn download_one(
        &self,
        institution: &Institution,
        candidate: &TranscriptRef,
        ledger: &mut InvalidLedger,
        errors: &mut Vec<RunError>,
    ) -> Result<DownloadOutcome> {
        let ticker = &institution.ticker;

        if candidate.download_link.is_none() {
            warn!("No download link for {ticker} event {}", candidate.event_id);
            errors.push(RunError::new(
                ticker,
                Stage::Downloading,
                format!("no download link for event {}", candidate.event_id),
            ));
            return Ok(DownloadOutcome::Unavailable);
        }

        let Some(bytes) = self.download_with_retry(ticker, candidate, errors).await else {
            return Ok(DownloadOutcome::Unavailable);
        };

        let (quarter, year, found_title) = title::extract_title_and_period(&bytes);

        if !title::is_valid_earnings_call_title(&found_title) {
            ledger.append(InvalidLedgerEntry {
                ticker: ticker.clone(),
                institution_name: institution.name.clone(),
                event_id: candidate.event_id.clone(),
                version_id: candidate.version_id.clone(),
                title_found: found_title.clone(),
                event_date: candidate
                    .event_date
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                transcript_type: candidate.transcript_type.clone(),
                reason: REJECTION_REASON.to_string(),
                date_added: Utc::now().to_rfc3339(),
            });
            return Ok(DownloadOutcome::Rejected(found_title));
        }

        // Storage location comes from the validated title, not the source's
        // event date.
        let file_name = filename::encode(
            &candidate.ticker,
            &quarter,
            &year,
            &candidate.transcript_type,
            &candidate.event_id,
            &candidate.version_id,
        );
        let company_dir = format!("{ticker}_{}", sanitize_company_name(&institution.name));
        let dir_path = path_join(&[
            &self.settings.sync.output_data_path,
            &year,
            &quarter,
            &institution.company_type,
            &company_dir,
        ]);

        self.store
            .mkdir_recursive(&dir_path)
            .await
            .with_context(|| format!("creating directory {dir_path}"))?;

        let file_path = path_join(&[&dir_path, &file_name]);
        self.store
            .write(&file_path, &bytes)
            .await
            .with_context(|| format!("storing {file_path}"))?;

        Ok(DownloadOutcome::Stored(file_name))
    }
}

/// Persist the run summary (and, when present, the error list) as JSON under
/// the logs path. Best effort at run end; failures are the caller's to log.
pub async fn save_run_logs(
    store: &dyn BlobStore,
    logs_path: &str,
    summary: &RunSummary,
) -> Result<()> {
    let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");

    store
        .mkdir_recursive(logs_path)
        .await
        .with_context(|| format!("creating logs directory {logs_path}"))?;

    let summary_json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    let summary_path = path_join(&[logs_path, &format!("transcript_sync_{timestamp}.json")]);
    store
        .write(&summary_path, &summary_json)
        .await
        .with_context(|| format!("writing {summary_path}"))?;
    info!("Run summary saved: {summary_path}");

    if !summary.errors.is_empty() {
        let errors_dir = path_join(&[logs_path, "Errors"]);
        store
            .mkdir_recursive(&errors_dir)
            .await
            .with_context(|| format!("creating {errors_dir}"))?;

        let errors_json =
            serde_json::to_vec_pretty(&summary.errors).context("serializing run errors")?;
        let errors_path = path_join(&[
            &errors_dir,
            &format!("transcript_sync_errors_{timestamp}.json"),
        ]);
        store
            .write(&errors_path, &errors_json)
            .await
            .with_context(|| format!("writing {errors_path}"))?;
        warn!(
            "Run finished with {} errors, detail saved: {errors_path}",
            summary.errors.len()
        );
    }

    Ok(())
}
