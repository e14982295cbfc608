use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::ledger::InvalidLedger;
use crate::models::{ReconciliationDecision, StoredTranscriptRecord, TranscriptRef};

/// Per-decision tallies for one institution's comparison pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionLog {
    pub contamination_rejected: usize,
    pub skipped_invalid: usize,
    pub skipped_unchanged: usize,
    pub new_events: usize,
    pub new_transcript_types: usize,
    pub version_updates: usize,
}

/// Minimal download plan for one institution.
#[derive(Debug, Default)]
pub struct ReconciliationPlan {
    pub to_download: Vec<TranscriptRef>,
    pub log: DecisionLog,
}

/// Drop transcripts where the institution is not the sole primary entity.
///
/// The source's search can return transcripts where the queried ticker is a
/// secondary participant; those must never be filed under this institution's
/// archive, so they are removed before reconciliation sees them.
pub fn contamination_filter(ticker: &str, refs: Vec<TranscriptRef>) -> (Vec<TranscriptRef>, usize) {
    let before = refs.len();
    let kept: Vec<TranscriptRef> = refs
        .into_iter()
        .filter(|t| t.primary_ids.len() == 1 && t.primary_ids[0] == ticker)
        .collect();
    let rejected = before - kept.len();
    (kept, rejected)
}

/// Compare the source's current listing against the stored inventory and the
/// invalid ledger, producing the set of transcripts to fetch.
///
/// The source's version is always authoritative. A version update downloads
/// the newer file beside the old one; nothing stored is ever deleted. The
/// plan is a pure function of its inputs, so re-running it against the same
/// snapshot yields the same plan.
pub fn plan(
    ticker: &str,
    source: Vec<TranscriptRef>,
    stored: &[StoredTranscriptRecord],
    ledger: &InvalidLedger,
) -> ReconciliationPlan {
    let (filtered, contamination_rejected) = contamination_filter(ticker, source);

    let mut stored_by_event: HashMap<&str, Vec<&StoredTranscriptRecord>> = HashMap::new();
    for record in stored {
        stored_by_event
            .entry(record.event_id.as_str())
            .or_default()
            .push(record);
    }

    let mut result = ReconciliationPlan::default();
    result.log.contamination_rejected = contamination_rejected;

    for candidate in filtered {
        let decision = decide(&candidate, &stored_by_event, ledger);
        debug!(
            "Decision for event {} version {} ({}): {:?}",
            candidate.event_id, candidate.version_id, candidate.transcript_type, decision
        );
        match decision {
            ReconciliationDecision::SkipInvalid => result.log.skipped_invalid += 1,
            ReconciliationDecision::SkipUnchanged => result.log.skipped_unchanged += 1,
            ReconciliationDecision::DownloadNewEvent => {
                result.log.new_events += 1;
                result.to_download.push(candidate);
            }
            ReconciliationDecision::DownloadNewType => {
                result.log.new_transcript_types += 1;
                result.to_download.push(candidate);
            }
            ReconciliationDecision::DownloadVersionUpdate => {
                result.log.version_updates += 1;
                result.to_download.push(candidate);
            }
        }
    }

    result
}

/// Decide one candidate. The ledger check runs first and short-circuits.
fn decide(
    candidate: &TranscriptRef,
    stored_by_event: &HashMap<&str, Vec<&StoredTranscriptRecord>>,
    ledger: &InvalidLedger,
) -> ReconciliationDecision {
    if ledger.contains(&candidate.event_id, &candidate.version_id) {
        return ReconciliationDecision::SkipInvalid;
    }

    let Some(stored_versions) = stored_by_event.get(candidate.event_id.as_str()) else {
        return ReconciliationDecision::DownloadNewEvent;
    };

    let matching = stored_versions.iter().find(|record| {
        record.transcript_type == candidate.transcript_type && record.ticker == candidate.ticker
    });

    match matching {
        None => ReconciliationDecision::DownloadNewType,
        Some(record) if record.version_id != candidate.version_id => {
            ReconciliationDecision::DownloadVersionUpdate
        }
        Some(_) => ReconciliationDecision::SkipUnchanged,
    }
}
