// Translation quality scoring
//
// Two independent per-row measures between the original text and its
// back-translation:
// - Lexical: sequence-matcher ratio over characters
// - Semantic: cosine similarity of sentence embeddings, encoded in batches
//
// Rows where either side is a sentinel get no scores.

pub mod lexical;
pub mod semantic;

use tracing::info;

pub use lexical::sequence_ratio;
pub use semantic::{cosine_similarity, encode_batched, Embedder, OllamaEmbedder};

use crate::config::EvaluationConfig;
use crate::dataset::{is_sentinel, Dataset, SEMANTIC_SIMILARITY_COLUMN, TEXT_SIMILARITY_COLUMN};
use crate::error::{BacktransError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RowScores {
    pub semantic: Option<f64>,
    pub lexical: Option<f64>,
}

pub struct Evaluator<'a> {
    embedder: &'a dyn Embedder,
    batch_size: usize,
    round_digits: u32,
}

impl<'a> Evaluator<'a> {
    pub fn new(embedder: &'a dyn Embedder, batch_size: usize, round_digits: u32) -> Self {
        Self {
            embedder,
            batch_size,
            round_digits,
        }
    }

    pub fn from_config(embedder: &'a dyn Embedder, config: &EvaluationConfig) -> Self {
        Self::new(embedder, config.batch_size, config.round_digits)
    }

    /// Score row `i` of `originals` against row `i` of `back_translations`
    pub async fn score(&self, originals: &[String], back_translations: &[String]) -> Result<Vec<RowScores>> {
        if originals.len() != back_translations.len() {
            return Err(BacktransError::Evaluation(format!(
                "{} originals but {} back-translations",
                originals.len(),
                back_translations.len()
            )));
        }

        let eligible: Vec<usize> = (0..originals.len())
            .filter(|&i| !is_sentinel(&originals[i]) && !is_sentinel(&back_translations[i]))
            .collect();

        let left: Vec<String> = eligible.iter().map(|&i| originals[i].clone()).collect();
        let right: Vec<String> = eligible.iter().map(|&i| back_translations[i].clone()).collect();

        let left_vectors = encode_batched(self.embedder, &left, self.batch_size).await?;
        let right_vectors = encode_batched(self.embedder, &right, self.batch_size).await?;

        let mut scores = vec![RowScores::default(); originals.len()];
        for (n, &i) in eligible.iter().enumerate() {
            let semantic = cosine_similarity(&left_vectors[n], &right_vectors[n])?;
            scores[i] = RowScores {
                semantic: Some(round_to(semantic, self.round_digits)),
                lexical: Some(sequence_ratio(&originals[i], &back_translations[i])),
            };
        }

        info!("Scored {} of {} rows", eligible.len(), originals.len());
        Ok(scores)
    }

    /// Append `Semantic_Similarity` and `Text_Similarity`; undefined scores are empty cells
    pub async fn evaluate(&self, mut dataset: Dataset, original_column: &str, back_column: &str) -> Result<Dataset> {
        let originals = dataset.text_column(original_column)?;
        let back_translations = dataset.text_column(back_column)?;

        let scores = self.score(&originals, &back_translations).await?;

        dataset.push_column(
            SEMANTIC_SIMILARITY_COLUMN,
            scores.iter().map(|s| format_score(s.semantic)).collect(),
        )?;
        dataset.push_column(
            TEXT_SIMILARITY_COLUMN,
            scores.iter().map(|s| format_score(s.lexical)).collect(),
        )?;
        Ok(dataset)
    }
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Keeps a decimal point on whole numbers (`1.0`, not `1`)
fn format_score(score: Option<f64>) -> String {
    score.map(|s| format!("{:?}", s)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Bag-of-letters embedding: deterministic and order-insensitive
    struct LetterEmbedder {
        calls: Mutex<Vec<usize>>,
    }

    impl LetterEmbedder {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
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

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(1.0, 4), 1.0);
    }

    #[test]
    fn scores_keep_float_formatting() {
        assert_eq!(format_score(Some(1.0)), "1.0");
        assert_eq!(format_score(Some(0.0)), "0.0");
        assert_eq!(format_score(Some(0.75)), "0.75");
        assert_eq!(format_score(Some(0.1235)), "0.1235");
        assert_eq!(format_score(None), "");
    }

    #[tokio::test]
    async fn sentinel_rows_have_no_scores() {
        let embedder = LetterEmbedder::new();
        let evaluator = Evaluator::new(&embedder, 32, 4);

        let scores = evaluator
            .score(&strings(&["Hello world", "", "nan"]), &strings(&["Hello world", "x", "nan"]))
            .await
            .unwrap();

        assert_eq!(scores[0], RowScores { semantic: Some(1.0), lexical: Some(1.0) });
        assert_eq!(scores[1], RowScores::default());
        assert_eq!(scores[2], RowScores::default());
    }

    #[tokio::test]
    async fn encodes_each_side_in_batches() {
        let embedder = LetterEmbedder::new();
        let evaluator = Evaluator::new(&embedder, 2, 4);
        let texts = strings(&["a", "b", "c", "d", "e"]);

        evaluator.score(&texts, &texts).await.unwrap();

        assert_eq!(*embedder.calls.lock().unwrap(), vec![2, 2, 1, 2, 2, 1]);
    }

    #[tokio::test]
    async fn semantic_score_is_symmetric() {
        let embedder = LetterEmbedder::new();
        let evaluator = Evaluator::new(&embedder, 32, 4);
        let a = strings(&["The cat sat on the mat"]);
        let b = strings(&["A cat was sitting on a mat"]);

        let forward = evaluator.score(&a, &b).await.unwrap();
        let reverse = evaluator.score(&b, &a).await.unwrap();
        assert_eq!(forward[0].semantic, reverse[0].semantic);
    }

    #[tokio::test]
    async fn evaluate_appends_both_columns() {
        let embedder = LetterEmbedder::new();
        let evaluator = Evaluator::new(&embedder, 32, 4);
        let dataset = Dataset::new(
            "scores",
            strings(&["English", "Back_Translated"]),
            vec![strings(&["Hello", "Hello"]), strings(&["", ""])],
        )
        .unwrap();

        let scored = evaluator.evaluate(dataset, "English", "Back_Translated").await.unwrap();

        assert_eq!(&scored.headers()[2..], &strings(&[SEMANTIC_SIMILARITY_COLUMN, TEXT_SIMILARITY_COLUMN])[..]);
        assert_eq!(scored.row(0).unwrap()[2..], strings(&["1.0", "1.0"])[..]);
        assert_eq!(scored.row(1).unwrap()[2..], strings(&["", ""])[..]);
    }

    #[tokio::test]
    async fn length_mismatch_is_rejected() {
        let embedder = LetterEmbedder::new();
        let evaluator = Evaluator::new(&embedder, 32, 4);
        let err = evaluator.score(&strings(&["a"]), &[]).await.unwrap_err();
        assert!(matches!(err, BacktransError::Evaluation(_)));
    }
}
