use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use async_trait::async_trait;
use predicates::prelude::*;
use tokio_util::sync::CancellationToken;

use backtrans::backup::{row_file_name, BackupStore, FINAL_FILE, LOG_FILE, ORIGINAL_FILE};
use backtrans::dataset::{Dataset, BACK_TRANSLATED_COLUMN};
use backtrans::error::BacktransError;
use backtrans::evaluation::{Embedder, Evaluator};
use backtrans::languages::LanguageSelection;
use backtrans::providers::{
    BackTranslator, ForwardTranslator, ProviderError, ProviderErrorKind, ProviderResult, RetryPolicy,
};
use backtrans::workflow::{BatchController, ProgressObserver};

/// Deterministic forward provider: a small phrase book, otherwise `CODE:text`.
/// Texts containing `FAIL` are rejected permanently, `FLAKY` fails once.
#[derive(Default)]
struct PhraseForward {
    calls: Arc<AtomicUsize>,
    flaky_seen: Arc<AtomicUsize>,
}

#[async_trait]
impl ForwardTranslator for PhraseForward {
    fn name(&self) -> &'static str {
        "DeepL"
    }

    async fn translate(&self, text: &str, target_code: &str) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL") {
            return Err(ProviderError::new(ProviderErrorKind::Auth, "HTTP 403: invalid key"));
        }
        if text.contains("FLAKY") && self.flaky_seen.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ProviderError::new(ProviderErrorKind::Network, "connection reset"));
        }
        Ok(match text {
            "Hello world" => "Bonjour le monde".to_string(),
            other => format!("{}:{}", target_code, other),
        })
    }
}

/// Inverse of `PhraseForward`, recording the size of every grouped call.
/// Texts containing `BROKEN` are rejected, failing any group they are part of.
#[derive(Default)]
struct PhraseBack {
    calls: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl PhraseBack {
    fn invert(text: &str, from_code: &str) -> String {
        if text == "Bonjour le monde" {
            return "Hello world".to_string();
        }
        let prefix = format!("{}:", from_code.to_uppercase());
        text.strip_prefix(&prefix).unwrap_or(text).to_string()
    }

    fn rejected() -> ProviderError {
        ProviderError::new(ProviderErrorKind::Http(400), "HTTP 400: Bad language pair")
    }
}

#[async_trait]
impl BackTranslator for PhraseBack {
    fn name(&self) -> &'static str {
        "Google"
    }

    async fn translate(&self, text: &str, from_code: &str) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("BROKEN") {
            return Err(Self::rejected());
        }
        Ok(Self::invert(text, from_code))
    }

    async fn translate_batch(&self, texts: &[String], from_code: &str) -> ProviderResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap().push(texts.len());
        if texts.iter().any(|t| t.contains("BROKEN")) {
            return Err(Self::rejected());
        }
        Ok(texts.iter().map(|t| Self::invert(t, from_code)).collect())
    }
}

/// Bag-of-letters embedding
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, texts: &[String]) -> backtrans::error::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                    v[(c - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Turns a session file into a directory once row `after` is done,
/// so the next write of that file fails
struct BlockFile {
    root: PathBuf,
    after: usize,
    file: String,
}

impl ProgressObserver for BlockFile {
    fn row_completed(&self, index: usize, _total: usize) {
        if index == self.after {
            let session = fs::read_dir(&self.root).unwrap().next().unwrap().unwrap().path();
            fs::create_dir(session.join(&self.file)).unwrap();
        }
    }
}

fn french() -> LanguageSelection {
    LanguageSelection::from_codes("FR", "fr")
}

fn english_dataset(texts: &[&str]) -> Dataset {
    Dataset::new(
        "phrases",
        vec!["Id".to_string(), "English".to_string()],
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| vec![i.to_string(), t.to_string()])
            .collect(),
    )
    .unwrap()
}

fn column(dataset: &Dataset, name: &str) -> Vec<String> {
    dataset.text_column(name).unwrap()
}

fn controller(root: &TempDir) -> BatchController {
    BatchController::new(
        Box::new(PhraseForward::default()),
        Box::new(PhraseBack::default()),
        BackupStore::new(root.path()),
    )
}

#[tokio::test]
async fn round_trip_of_a_single_row() {
    let root = TempDir::new().unwrap();
    let outcome = controller(&root)
        .run(english_dataset(&["Hello world"]), "English", &french(), "phrases.csv")
        .await
        .unwrap();

    let dataset = &outcome.dataset;
    assert_eq!(
        dataset.headers(),
        &["Id", "English", "Translated", "DeepL_Translation_Error", "Back_Translated", "Google_Translation_Error"]
    );
    assert_eq!(
        dataset.row(0).unwrap(),
        &["0", "Hello world", "Bonjour le monde", "False", "Hello world", "False"]
    );
    assert_eq!((outcome.forward_failures, outcome.back_failures), (0, 0));

    let scored = Evaluator::new(&LetterEmbedder, 32, 4)
        .evaluate(outcome.dataset, "English", BACK_TRANSLATED_COLUMN)
        .await
        .unwrap();
    assert_eq!(column(&scored, "Semantic_Similarity"), vec!["1.0"]);
    assert_eq!(column(&scored, "Text_Similarity"), vec!["1.0"]);
}

#[tokio::test]
async fn forward_failure_stays_on_its_row() {
    let root = TempDir::new().unwrap();
    let texts = ["one", "two", "three", "FAIL four", "five"];
    let outcome = controller(&root)
        .run(english_dataset(&texts), "English", &french(), "phrases.csv")
        .await
        .unwrap();

    let flags = column(&outcome.dataset, "DeepL_Translation_Error");
    assert_eq!(flags, vec!["False", "False", "False", "True", "False"]);
    assert_eq!(column(&outcome.dataset, "Translated")[3], "FAIL four");
    assert_eq!(column(&outcome.dataset, "Back_Translated"), texts.to_vec());
    assert_eq!(outcome.forward_failures, 1);

    let log = fs::read_to_string(outcome.session_dir.join(LOG_FILE)).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("DeepL Error at row 3:"));
}

#[tokio::test]
async fn sentinel_rows_pass_through_without_calls() {
    let root = TempDir::new().unwrap();
    let forward = PhraseForward::default();
    let forward_calls = forward.calls.clone();
    let back = PhraseBack::default();
    let back_calls = back.calls.clone();

    let outcome = BatchController::new(Box::new(forward), Box::new(back), BackupStore::new(root.path()))
        .run(english_dataset(&["", "nan", "None"]), "English", &french(), "blank.csv")
        .await
        .unwrap();

    assert_eq!(column(&outcome.dataset, "Translated"), vec!["", "nan", "None"]);
    assert_eq!(column(&outcome.dataset, "Back_Translated"), vec!["", "nan", "None"]);
    assert_eq!(column(&outcome.dataset, "DeepL_Translation_Error"), vec!["True"; 3]);
    assert_eq!(column(&outcome.dataset, "Google_Translation_Error"), vec!["True"; 3]);
    assert_eq!(forward_calls.load(Ordering::SeqCst), 0);
    assert_eq!(back_calls.load(Ordering::SeqCst), 0);

    // Skipped sentinels are not failures and leave nothing in the progress log
    assert_eq!(outcome.forward_failures, 0);
    assert!(!outcome.session_dir.join(LOG_FILE).exists());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let root = TempDir::new().unwrap();
    let forward = PhraseForward::default();
    let calls = forward.calls.clone();

    let outcome = BatchController::new(
        Box::new(forward),
        Box::new(PhraseBack::default()),
        BackupStore::new(root.path()),
    )
    .with_retry(RetryPolicy { max_retries: 2, backoff: Duration::from_millis(1) })
    .run(english_dataset(&["FLAKY row"]), "English", &french(), "flaky.csv")
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(column(&outcome.dataset, "Translated"), vec!["FR:FLAKY row"]);
    assert_eq!(column(&outcome.dataset, "DeepL_Translation_Error"), vec!["False"]);
}

#[tokio::test]
async fn unwritable_backup_root_fails_before_any_call() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.child("not-a-directory");
    blocker.write_str("occupied").unwrap();

    let forward = PhraseForward::default();
    let forward_calls = forward.calls.clone();
    let back = PhraseBack::default();
    let back_calls = back.calls.clone();

    let err = BatchController::new(Box::new(forward), Box::new(back), BackupStore::new(blocker.path()))
        .run(english_dataset(&["Hello world"]), "English", &french(), "phrases.csv")
        .await
        .unwrap_err();

    assert!(matches!(err, BacktransError::Storage(_)));
    assert!(!err.leaves_partial_backup());
    assert_eq!(forward_calls.load(Ordering::SeqCst), 0);
    assert_eq!(back_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_column_opens_no_session() {
    let root = TempDir::new().unwrap();
    let store_root = root.child("backups");

    let err = BatchController::new(
        Box::new(PhraseForward::default()),
        Box::new(PhraseBack::default()),
        BackupStore::new(store_root.path()),
    )
    .run(english_dataset(&["Hello"]), "Deutsch", &french(), "phrases.csv")
    .await
    .unwrap_err();

    assert!(matches!(err, BacktransError::Dataset(_)));
    store_root.assert(predicate::path::missing());
}

#[tokio::test]
async fn chunk_size_does_not_change_results() {
    let texts: Vec<String> = (0..120).map(|i| format!("sentence number {}", i)).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

    let mut outputs = Vec::new();
    let mut batch_sizes = Vec::new();
    for chunk_size in [50, 500] {
        let root = TempDir::new().unwrap();
        let back = PhraseBack::default();
        let batches = back.batches.clone();

        let outcome = BatchController::new(
            Box::new(PhraseForward::default()),
            Box::new(back),
            BackupStore::new(root.path()),
        )
        .with_chunk_size(chunk_size)
        .run(english_dataset(&refs), "English", &french(), "long.csv")
        .await
        .unwrap();

        outputs.push(outcome.dataset.to_csv_bytes().unwrap());
        batch_sizes.push(batches.lock().unwrap().clone());
    }

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(batch_sizes[0], vec![50, 50, 20]);
    assert_eq!(batch_sizes[1], vec![120]);
}

#[tokio::test]
async fn repeated_runs_are_identical() {
    let dataset_texts = ["Hello world", "FAIL here", "", "plain text"];

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let root = TempDir::new().unwrap();
        let outcome = controller(&root)
            .run(english_dataset(&dataset_texts), "English", &french(), "phrases.csv")
            .await
            .unwrap();
        let scored = Evaluator::new(&LetterEmbedder, 2, 4)
            .evaluate(outcome.dataset, "English", BACK_TRANSLATED_COLUMN)
            .await
            .unwrap();
        outputs.push(scored.to_csv_bytes().unwrap());
    }

    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn completed_session_holds_every_snapshot() {
    let root = TempDir::new().unwrap();
    let outcome = controller(&root)
        .run(english_dataset(&["a", "b", "c"]), "English", &french(), "letters.csv")
        .await
        .unwrap();

    let session = assert_fs::fixture::ChildPath::new(&outcome.session_dir);
    session.child(ORIGINAL_FILE).assert(predicate::str::contains("Id,English"));
    session.child(FINAL_FILE).assert(predicate::str::contains("Google_Translation_Error"));
    for index in 0..3 {
        session
            .child(row_file_name(index))
            .assert(predicate::str::contains("Back_Translated"));
    }

    let store = BackupStore::new(root.path());
    let sessions = store.session_summaries().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].completed);
    assert_eq!(sessions[0].row_snapshots, 3);
    assert!(sessions[0].id.starts_with("letters_"));
}

#[tokio::test]
async fn cancellation_keeps_partial_backup() {
    let root = TempDir::new().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = controller(&root)
        .with_cancellation(token)
        .run(english_dataset(&["a", "b"]), "English", &french(), "letters.csv")
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), BacktransError::Cancelled { row: 0 }));
    assert!(err.leaves_partial_backup());

    let sessions = BackupStore::new(root.path()).session_summaries().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].completed);
    assert_eq!(err.session_dir(), Some(sessions[0].path.as_path()));

    let session = assert_fs::fixture::ChildPath::new(&sessions[0].path);
    session.child(ORIGINAL_FILE).assert(predicate::path::exists());
    session.child(FINAL_FILE).assert(predicate::path::missing());
    session
        .child(LOG_FILE)
        .assert(predicate::str::starts_with("CRITICAL ERROR: cancelled before row 0"));
}

#[tokio::test]
async fn back_failure_stays_on_its_row() {
    let root = TempDir::new().unwrap();
    let texts = ["one", "BROKEN two", "three"];
    let outcome = controller(&root)
        .run(english_dataset(&texts), "English", &french(), "phrases.csv")
        .await
        .unwrap();

    let dataset = &outcome.dataset;
    assert_eq!(column(dataset, "Google_Translation_Error"), vec!["False", "True", "False"]);
    assert_eq!(column(dataset, "DeepL_Translation_Error"), vec!["False"; 3]);
    assert_eq!(column(dataset, "Back_Translated")[1], column(dataset, "Translated")[1]);
    assert_eq!(column(dataset, "Back_Translated")[1], "FR:BROKEN two");
    assert_eq!(column(dataset, "Back_Translated")[2], "three");
    assert_eq!((outcome.forward_failures, outcome.back_failures), (0, 1));

    let log = fs::read_to_string(outcome.session_dir.join(LOG_FILE)).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines, vec!["Google Error at row 1: HTTP 400: Bad language pair"]);
}

#[tokio::test]
async fn storage_failure_mid_run_reports_partial_backup() {
    let root = TempDir::new().unwrap();
    let err = controller(&root)
        .with_chunk_size(1)
        .with_observer(Box::new(BlockFile {
            root: root.path().to_path_buf(),
            after: 0,
            file: row_file_name(1),
        }))
        .run(english_dataset(&["a", "b", "c"]), "English", &french(), "letters.csv")
        .await
        .unwrap_err();

    assert!(err.leaves_partial_backup());
    assert!(matches!(err.root_cause(), BacktransError::Storage(_)));

    let session_dir = err.session_dir().unwrap().to_path_buf();
    let session = assert_fs::fixture::ChildPath::new(&session_dir);
    session.child(ORIGINAL_FILE).assert(predicate::path::is_file());
    session.child(row_file_name(0)).assert(predicate::str::contains("Back_Translated"));
    session.child(row_file_name(2)).assert(predicate::path::missing());
    session.child(FINAL_FILE).assert(predicate::path::missing());
    session.child(LOG_FILE).assert(
        predicate::str::starts_with("CRITICAL ERROR: Backup storage error:").and(predicate::str::contains("row_1.csv")),
    );
}

#[tokio::test]
async fn failed_final_commit_is_logged_as_critical() {
    let root = TempDir::new().unwrap();
    let err = controller(&root)
        .with_observer(Box::new(BlockFile {
            root: root.path().to_path_buf(),
            after: 0,
            file: FINAL_FILE.to_string(),
        }))
        .run(english_dataset(&["Hello world"]), "English", &french(), "phrases.csv")
        .await
        .unwrap_err();

    assert!(err.leaves_partial_backup());
    assert!(matches!(err.root_cause(), BacktransError::Storage(_)));

    let sessions = BackupStore::new(root.path()).session_summaries().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].completed);
    assert_eq!(sessions[0].row_snapshots, 1);

    let log = fs::read_to_string(sessions[0].path.join(LOG_FILE)).unwrap();
    let last = log.lines().last().unwrap();
    assert!(last.starts_with("CRITICAL ERROR: Backup storage error:"));
    assert!(last.contains(FINAL_FILE));
}
