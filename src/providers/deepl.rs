use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ForwardConfig;
use crate::dataset::is_sentinel;
use crate::error::{BacktransError, Result};
use super::{ForwardTranslator, ProviderError, ProviderResult};

const FREE_ENDPOINT: &str = "https://api-free.deepl.com";
const PRO_ENDPOINT: &str = "https://api.deepl.com";

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

/// Forward translation through the DeepL v2 REST API
pub struct DeepLTranslator {
    client: Client,
    endpoint: String,
    auth_key: String,
}

impl DeepLTranslator {
    pub fn new(config: &ForwardConfig, auth_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(BacktransError::Http)?;

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| default_endpoint(&auth_key).to_string());

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_key,
        })
    }
}

/// Free-tier keys carry a `:fx` suffix and live on a separate host
pub fn default_endpoint(auth_key: &str) -> &'static str {
    if auth_key.ends_with(":fx") { FREE_ENDPOINT } else { PRO_ENDPOINT }
}

fn parse_response(body: &str) -> ProviderResult<String> {
    let parsed: DeepLResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(format!("Failed to parse DeepL response: {}", e)))?;

    parsed
        .translations
        .into_iter()
        .next()
        .map(|t| t.text)
        .ok_or_else(|| ProviderError::malformed("DeepL response contained no translations"))
}

#[async_trait]
impl ForwardTranslator for DeepLTranslator {
    fn name(&self) -> &'static str {
        "DeepL"
    }

    async fn translate(&self, text: &str, target_code: &str) -> ProviderResult<String> {
        if is_sentinel(text) {
            return Ok(text.to_string());
        }

        let url = format!("{}/v2/translate", self.endpoint);
        debug!("Sending DeepL request to {} (target {})", url, target_code);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.auth_key))
            .form(&[("text", text), ("target_lang", target_code)])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        parse_response(&body)
    }
}
