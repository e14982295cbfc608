//! End-to-end sync scenarios against a scripted transcript source and a
//! temporary blob store root.

use async_trait::async_trait;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

use transcript_sync::api::{ApiError, TranscriptSource};
use transcript_sync::models::{
    ApiSettings, DateWindow, Institution, StageSettings, SyncSettings, TranscriptRef,
};
use transcript_sync::orchestrator::{SyncOrchestrator, REJECTION_REASON};
use transcript_sync::storage::{BlobStore, LocalBlobStore};

struct ScriptedSource {
    refs: Vec<TranscriptRef>,
    bodies: HashMap<(String, String), Vec<u8>>,
    download_calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(refs: Vec<TranscriptRef>, bodies: Vec<((&str, &str), String)>) -> Self {
        Self {
            refs,
            bodies: bodies
                .into_iter()
                .map(|((event, version), body)| {
                    ((event.to_string(), version.to_string()), body.into_bytes())
                })
                .collect(),
            download_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranscriptSource for ScriptedSource {
    async fn fetch_transcripts(
        &self,
        ticker: &str,
        _window: DateWindow,
    ) -> Result<Vec<TranscriptRef>, ApiError> {
        Ok(self
            .refs
            .iter()
            .filter(|r| r.ticker == ticker)
            .cloned()
            .collect())
    }

    async fn download(&self, transcript: &TranscriptRef) -> Result<Vec<u8>, ApiError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .bodies
            .get(&(transcript.event_id.clone(), transcript.version_id.clone()))
            .expect("scripted body for transcript")
            .clone())
    }
}

fn transcript_xml(title: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?><transcript><meta><title>{title}</title></meta><body/></transcript>"
    )
}

fn source_ref(ticker: &str, event_id: &str, version_id: &str) -> TranscriptRef {
    TranscriptRef {
        ticker: ticker.to_string(),
        transcript_type: "Final".to_string(),
        event_id: event_id.to_string(),
        version_id: version_id.to_string(),
        event_date: NaiveDate::from_ymd_opt(2024, 2, 28),
        download_link: Some(format!("https://vendor.example/doc/{event_id}/{version_id}")),
        primary_ids: vec![ticker.to_string()],
    }
}

fn settings() -> SyncSettings {
    SyncSettings {
        institutions: vec![Institution {
            ticker: "RY-CA".to_string(),
            name: "Royal Bank of Canada".to_string(),
            company_type: "Canadian_Banks".to_string(),
        }],
        api_settings: ApiSettings {
            transcript_types: vec!["Corrected".to_string(), "Final".to_string()],
            industry_categories: vec!["IN:BANKS".to_string()],
            sort_order: "-storyDateTime".to_string(),
            pagination_limit: 1000,
            pagination_offset: 0,
            request_delay: 0.0,
            max_retries: 2,
            retry_delay: 0.0,
            use_exponential_backoff: false,
            max_backoff_delay: 0.0,
        },
        sync: StageSettings {
            output_data_path: "Outputs/Data".to_string(),
            output_logs_path: "Outputs/Logs".to_string(),
            start_year: None,
        },
    }
}

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

#[tokio::test]
async fn valid_transcript_is_stored_and_invalid_one_is_ledgered() {
    let dir = tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path());
    let source = ScriptedSource::new(
        vec![source_ref("RY-CA", "1", "1"), source_ref("RY-CA", "2", "1")],
        vec![
            (("1", "1"), transcript_xml("Q1 2024 Earnings Call")),
            (("2", "1"), transcript_xml("Annual Shareholder Meeting")),
        ],
    );
    let settings = settings();

    let orchestrator = SyncOrchestrator::new(&store, &source, &settings);
    let summary = orchestrator.run(run_date()).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.added_to_invalid_ledger, 1);
    assert_eq!(summary.failed_institutions, 0);
    assert!(summary.errors.is_empty());

    let stored_path =
        "Outputs/Data/2024/Q1/Canadian_Banks/RY-CA_RoyalBankofCanada/RY-CA_Q1_2024_Final_1_1.xml";
    assert!(store.exists(stored_path).await);
    assert_eq!(
        store.read(stored_path).await.unwrap(),
        transcript_xml("Q1 2024 Earnings Call").into_bytes()
    );

    // The rejected transcript is ledgered, not stored.
    let ledger_csv = store
        .read("Outputs/Data/InvalidTranscripts/invalid_transcripts.csv")
        .await
        .unwrap();
    let ledger_text = String::from_utf8(ledger_csv).unwrap();
    assert!(ledger_text.contains("Annual Shareholder Meeting"));
    assert!(ledger_text.contains(REJECTION_REASON));
    let year_dirs = store.list_dirs("Outputs/Data").await.unwrap();
    assert_eq!(year_dirs, vec!["2024", "InvalidTranscripts"]);
}

#[tokio::test]
async fn second_run_downloads_nothing_new() {
    let dir = tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path());
    let source = ScriptedSource::new(
        vec![source_ref("RY-CA", "1", "1"), source_ref("RY-CA", "2", "1")],
        vec![
            (("1", "1"), transcript_xml("Q1 2024 Earnings Call")),
            (("2", "1"), transcript_xml("Annual Shareholder Meeting")),
        ],
    );
    let settings = settings();
    let orchestrator = SyncOrchestrator::new(&store, &source, &settings);

    orchestrator.run(run_date()).await.unwrap();
    let first_run_downloads = source.download_calls.load(Ordering::SeqCst);
    assert_eq!(first_run_downloads, 2);

    // The stored file satisfies event 1 and the ledger short-circuits
    // event 2, so the second run plans no downloads at all.
    let summary = orchestrator.run(run_date()).await.unwrap();
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.added_to_invalid_ledger, 0);
    assert_eq!(summary.transcript_files_found, 1);
    assert_eq!(source.download_calls.load(Ordering::SeqCst), first_run_downloads);
}

#[tokio::test]
async fn version_update_keeps_the_old_file() {
    let dir = tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path());

    let old_path =
        "Outputs/Data/2024/Q1/Canadian_Banks/RY-CA_RoyalBankofCanada/RY-CA_Q1_2024_Final_100_1.xml";
    store
        .write(old_path, transcript_xml("Q1 2024 Earnings Call").as_bytes())
        .await
        .unwrap();

    let source = ScriptedSource::new(
        vec![source_ref("RY-CA", "100", "2")],
        vec![(("100", "2"), transcript_xml("Q1 2024 Earnings Call"))],
    );
    let settings = settings();
    let orchestrator = SyncOrchestrator::new(&store, &source, &settings);
    let summary = orchestrator.run(run_date()).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    let new_path =
        "Outputs/Data/2024/Q1/Canadian_Banks/RY-CA_RoyalBankofCanada/RY-CA_Q1_2024_Final_100_2.xml";
    assert!(store.exists(new_path).await);
    // Archival policy: the stale version is never deleted.
    assert!(store.exists(old_path).await);
}

#[tokio::test]
async fn contaminated_transcripts_never_reach_the_archive() {
    let dir = tempdir().unwrap();
    let store = LocalBlobStore::new(dir.path());

    let mut contaminated = source_ref("RY-CA", "5", "1");
    contaminated.primary_ids = vec!["RY-CA".to_string(), "TD-CA".to_string()];

    let source = ScriptedSource::new(
        vec![contaminated],
        vec![(("5", "1"), transcript_xml("Q1 2024 Earnings Call"))],
    );
    let settings = settings();
    let orchestrator = SyncOrchestrator::new(&store, &source, &settings);
    let summary = orchestrator.run(run_date()).await.unwrap();

    assert_eq!(summary.downloaded, 0);
    assert_eq!(source.download_calls.load(Ordering::SeqCst), 0);
    assert!(!store.exists("Outputs/Data/2024").await);
}
