use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::BackConfig;
use crate::dataset::is_sentinel;
use crate::error::{BacktransError, Result};
use super::{BackTranslator, ProviderError, ProviderResult};

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    data: GoogleData,
}

#[derive(Debug, Deserialize)]
struct GoogleData {
    translations: Vec<GoogleTranslation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    translated_text: String,
}

/// Back translation through the Google Translate v2 endpoint
pub struct GoogleTranslator {
    client: Client,
    endpoint: String,
    api_key: String,
    /// Language of the original dataset text
    target_language: String,
}

impl GoogleTranslator {
    pub fn new(config: &BackConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(BacktransError::Http)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            target_language: config.source_language.clone(),
        })
    }

    async fn request(&self, texts: &[&str], from_code: &str) -> ProviderResult<Vec<String>> {
        let mut form: Vec<(&str, &str)> = texts.iter().map(|t| ("q", *t)).collect();
        form.push(("source", from_code));
        form.push(("target", self.target_language.as_str()));
        form.push(("format", "text"));
        form.push(("key", self.api_key.as_str()));

        debug!("Sending {} texts to Google ({} -> {})", texts.len(), from_code, self.target_language);

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        parse_response(&body, texts.len())
    }
}

fn parse_response(body: &str, expected: usize) -> ProviderResult<Vec<String>> {
    let parsed: GoogleResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(format!("Failed to parse Google response: {}", e)))?;

    let translations: Vec<String> = parsed
        .data
        .translations
        .into_iter()
        .map(|t| t.translated_text)
        .collect();

    if translations.len() != expected {
        return Err(ProviderError::malformed(format!(
            "Google returned {} translations for {} texts",
            translations.len(),
            expected
        )));
    }
    Ok(translations)
}

#[async_trait]
impl BackTranslator for GoogleTranslator {
    fn name(&self) -> &'static str {
        "Google"
    }

    async fn translate(&self, text: &str, from_code: &str) -> ProviderResult<String> {
        if is_sentinel(text) {
            return Ok(text.to_string());
        }
        let mut out = self.request(&[text], from_code).await?;
        out.pop()
            .ok_or_else(|| ProviderError::malformed("Google response contained no translations"))
    }

    /// One request for every translatable text; sentinels are passed through in place
    async fn translate_batch(&self, texts: &[String], from_code: &str) -> ProviderResult<Vec<String>> {
        let pending: Vec<&str> = texts
            .iter()
            .map(String::as_str)
            .filter(|t| !is_sentinel(t))
            .collect();

        let mut translated = if pending.is_empty() {
            Vec::new().into_iter()
        } else {
            self.request(&pending, from_code).await?.into_iter()
        };

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            if is_sentinel(text) {
                out.push(text.clone());
            } else {
                let value = translated
                    .next()
                    .ok_or_else(|| ProviderError::malformed("Google response ended early"))?;
                out.push(value);
            }
        }
        Ok(out)
    }
}
