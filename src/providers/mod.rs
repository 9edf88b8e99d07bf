// Translation provider adapters
//
// Two independent capabilities, each bound to one remote provider:
// - Forward: source text -> target language (DeepL)
// - Back: target language -> original language (Google Translate v2)
//
// Adapters report failures as `ProviderError`; the row pipeline absorbs
// those into row data, so they never become run-level errors.

pub mod deepl;
pub mod google;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::{api_key_from_env, BackConfig, ForwardConfig, RetryConfig};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Network,
    Timeout,
    Auth,
    Quota,
    RateLimited,
    Http(u16),
    Malformed,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Malformed, message)
    }

    /// Classify a non-2xx response
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => ProviderErrorKind::Auth,
            // DeepL signals an exhausted character quota with 456
            456 => ProviderErrorKind::Quota,
            429 => ProviderErrorKind::RateLimited,
            code => ProviderErrorKind::Http(code),
        };
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };
        Self::new(kind, message)
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_decode() {
            ProviderErrorKind::Malformed
        } else {
            ProviderErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }

    /// Worth another attempt: the same request may succeed later
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ProviderErrorKind::Network | ProviderErrorKind::Timeout | ProviderErrorKind::RateLimited => true,
            ProviderErrorKind::Http(code) => code >= 500,
            ProviderErrorKind::Auth | ProviderErrorKind::Quota | ProviderErrorKind::Malformed => false,
        }
    }
}

/// Source text to target language
#[async_trait]
pub trait ForwardTranslator: Send + Sync {
    /// Provider label used in progress log lines
    fn name(&self) -> &'static str;

    /// Sentinel input is returned unchanged without a remote call
    async fn translate(&self, text: &str, target_code: &str) -> ProviderResult<String>;
}

/// Translated text back to the original language
#[async_trait]
pub trait BackTranslator: Send + Sync {
    /// Provider label used in progress log lines
    fn name(&self) -> &'static str;

    /// Sentinel input is returned unchanged without a remote call.
    /// `from_code` is the language of `text`.
    async fn translate(&self, text: &str, from_code: &str) -> ProviderResult<String>;

    /// Translate several texts in one call, preserving order
    async fn translate_batch(&self, texts: &[String], from_code: &str) -> ProviderResult<Vec<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate(text, from_code).await?);
        }
        Ok(out)
    }
}

/// Bounded retries for transient provider failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("{} failed ({}), retry {}/{}", label, e, attempt, self.max_retries);
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Factory for the configured provider adapters
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_forward(config: &ForwardConfig) -> Result<Box<dyn ForwardTranslator>> {
        let key = api_key_from_env(&config.api_key_env)?;
        Ok(Box::new(deepl::DeepLTranslator::new(config, key)?))
    }

    pub fn create_back(config: &BackConfig) -> Result<Box<dyn BackTranslator>> {
        let key = api_key_from_env(&config.api_key_env)?;
        Ok(Box::new(google::GoogleTranslator::new(config, key)?))
    }
}
