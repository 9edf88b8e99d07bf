//! Per-row translation state machine.
//!
//! A row moves `Pending -> ForwardDone -> BackDone`; scoring happens later
//! over the whole dataset. Provider failures are folded into the row as a
//! passthrough value plus an error flag and one `progress.log` line, so one
//! bad row never stops the others. Only storage failures and misuse of the
//! state machine come back as errors.

use tracing::{debug, warn};

use crate::backup::SessionHandle;
use crate::dataset::{
    format_flag, is_sentinel, BACK_ERROR_COLUMN, BACK_TRANSLATED_COLUMN, FORWARD_ERROR_COLUMN,
    TRANSLATED_COLUMN,
};
use crate::error::{BacktransError, Result};
use crate::languages::LanguageSelection;
use crate::providers::{
    BackTranslator, ForwardTranslator, ProviderErrorKind, ProviderResult, RetryPolicy,
};

/// Result of one provider step for one row
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    Translated(String),
    /// Sentinel input, passed through without a call
    Skipped(String),
    Failed { passthrough: String, cause: String },
}

impl FieldOutcome {
    pub fn from_result(input: &str, result: ProviderResult<String>) -> Self {
        match result {
            Ok(text) => Self::Translated(text),
            Err(e) => Self::Failed {
                passthrough: input.to_string(),
                cause: e.to_string(),
            },
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Translated(text) | Self::Skipped(text) => text,
            Self::Failed { passthrough, .. } => passthrough,
        }
    }

    /// The exported error flag: set for failures and for skipped sentinels
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Translated(_))
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Pending,
    ForwardDone,
    BackDone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub index: usize,
    /// Original field values, in dataset column order
    pub fields: Vec<String>,
    pub source_text: String,
    pub forward: Option<FieldOutcome>,
    pub back: Option<FieldOutcome>,
}

impl RowRecord {
    pub fn new(index: usize, fields: Vec<String>, source_text: String) -> Self {
        Self {
            index,
            fields,
            source_text,
            forward: None,
            back: None,
        }
    }

    pub fn state(&self) -> RowState {
        match (&self.forward, &self.back) {
            (None, _) => RowState::Pending,
            (Some(_), None) => RowState::ForwardDone,
            (Some(_), Some(_)) => RowState::BackDone,
        }
    }

    pub fn forward_text(&self) -> Option<&str> {
        self.forward.as_ref().map(FieldOutcome::text)
    }

    pub fn back_text(&self) -> Option<&str> {
        self.back.as_ref().map(FieldOutcome::text)
    }

    /// Flattened snapshot: original columns plus every translation column computed so far
    pub fn snapshot(&self, headers: &[String]) -> (Vec<String>, Vec<String>) {
        let mut names = headers.to_vec();
        let mut values = self.fields.clone();

        if let Some(forward) = &self.forward {
            names.push(TRANSLATED_COLUMN.to_string());
            names.push(FORWARD_ERROR_COLUMN.to_string());
            values.push(forward.text().to_string());
            values.push(format_flag(forward.is_error()).to_string());
        }
        if let Some(back) = &self.back {
            names.push(BACK_TRANSLATED_COLUMN.to_string());
            names.push(BACK_ERROR_COLUMN.to_string());
            values.push(back.text().to_string());
            values.push(format_flag(back.is_error()).to_string());
        }
        (names, values)
    }
}

/// Drives provider calls for rows of one run and writes each step through the backup session
pub struct RowPipeline<'a> {
    forward: &'a dyn ForwardTranslator,
    back: &'a dyn BackTranslator,
    retry: &'a RetryPolicy,
    session: &'a SessionHandle,
    headers: &'a [String],
    language: &'a LanguageSelection,
}

impl<'a> RowPipeline<'a> {
    pub fn new(
        forward: &'a dyn ForwardTranslator,
        back: &'a dyn BackTranslator,
        retry: &'a RetryPolicy,
        session: &'a SessionHandle,
        headers: &'a [String],
        language: &'a LanguageSelection,
    ) -> Self {
        Self {
            forward,
            back,
            retry,
            session,
            headers,
            language,
        }
    }

    /// Both steps for a single row
    pub async fn process(&self, row: &mut RowRecord) -> Result<()> {
        self.forward_step(row).await?;
        self.back_step(row).await
    }

    /// `Pending -> ForwardDone`; re-running restarts the row
    pub async fn forward_step(&self, row: &mut RowRecord) -> Result<()> {
        let outcome = if is_sentinel(&row.source_text) {
            FieldOutcome::Skipped(row.source_text.clone())
        } else {
            let forward = self.forward;
            let text = row.source_text.as_str();
            let code = self.language.forward_code.as_str();
            let result = self
                .retry
                .run(forward.name(), move || forward.translate(text, code))
                .await;
            FieldOutcome::from_result(text, result)
        };

        row.back = None;
        self.record(row.index, self.forward.name(), &outcome)?;
        row.forward = Some(outcome);
        self.write_snapshot(row)
    }

    /// `ForwardDone -> BackDone` for a single row
    pub async fn back_step(&self, row: &mut RowRecord) -> Result<()> {
        self.back_chunk(std::slice::from_mut(row)).await
    }

    /// `ForwardDone -> BackDone` for consecutive rows with one grouped provider call
    pub async fn back_chunk(&self, rows: &mut [RowRecord]) -> Result<()> {
        let mut inputs = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let text = row.forward_text().ok_or_else(|| {
                BacktransError::Pipeline(format!(
                    "Row {} reached back-translation before forward translation", row.index
                ))
            })?;
            inputs.push(text.to_string());
        }

        let outcomes = self.back_translate_texts(&inputs).await;

        for (row, outcome) in rows.iter_mut().zip(outcomes) {
            self.record(row.index, self.back.name(), &outcome)?;
            row.back = Some(outcome);
            self.write_snapshot(row)?;
        }
        Ok(())
    }

    /// Back-translate texts in order, one outcome per input
    ///
    /// Translatable texts go out as one grouped request. When that request
    /// fails as a whole, each text is retried on its own so a single bad item
    /// cannot fail its neighbours.
    pub async fn back_translate_texts(&self, texts: &[String]) -> Vec<FieldOutcome> {
        let mut outcomes: Vec<Option<FieldOutcome>> = texts
            .iter()
            .map(|t| is_sentinel(t).then(|| FieldOutcome::Skipped(t.clone())))
            .collect();

        let pending: Vec<usize> = (0..texts.len()).filter(|&i| outcomes[i].is_none()).collect();
        if pending.is_empty() {
            return outcomes.into_iter().flatten().collect();
        }

        let back = self.back;
        let code = self.language.back_code.as_str();
        let batch: Vec<String> = pending.iter().map(|&i| texts[i].clone()).collect();
        let batch_ref = batch.as_slice();

        let grouped = self
            .retry
            .run(back.name(), move || back.translate_batch(batch_ref, code))
            .await;

        match grouped {
            Ok(translated) if translated.len() == pending.len() => {
                for (&i, text) in pending.iter().zip(translated) {
                    outcomes[i] = Some(FieldOutcome::Translated(text));
                }
            }
            Ok(translated) => {
                let cause = format!(
                    "{} returned {} results for {} texts",
                    back.name(), translated.len(), pending.len()
                );
                for &i in &pending {
                    outcomes[i] = Some(FieldOutcome::Failed {
                        passthrough: texts[i].clone(),
                        cause: cause.clone(),
                    });
                }
            }
            Err(e) if matches!(e.kind, ProviderErrorKind::Auth | ProviderErrorKind::Quota) => {
                // Account-level rejections would repeat for every item
                let cause = e.to_string();
                for &i in &pending {
                    outcomes[i] = Some(FieldOutcome::Failed {
                        passthrough: texts[i].clone(),
                        cause: cause.clone(),
                    });
                }
            }
            Err(e) if pending.len() == 1 => {
                let i = pending[0];
                outcomes[i] = Some(FieldOutcome::from_result(&texts[i], Err(e)));
            }
            Err(e) => {
                debug!("Grouped back-translation failed ({}), falling back to single requests", e);
                for &i in &pending {
                    let text = texts[i].as_str();
                    let result = self
                        .retry
                        .run(back.name(), move || back.translate(text, code))
                        .await;
                    outcomes[i] = Some(FieldOutcome::from_result(text, result));
                }
            }
        }

        outcomes.into_iter().flatten().collect()
    }

    fn record(&self, index: usize, provider: &str, outcome: &FieldOutcome) -> Result<()> {
        if let Some(cause) = outcome.cause() {
            warn!("{} translation failed at row {}: {}", provider, index, cause);
            self.session
                .append_log(&format!("{} Error at row {}: {}", provider, index, cause))?;
        }
        Ok(())
    }

    fn write_snapshot(&self, row: &RowRecord) -> Result<()> {
        let (names, values) = row.snapshot(self.headers);
        self.session.write_row(row.index, &names, &values)
    }
}
