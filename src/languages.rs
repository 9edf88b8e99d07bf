use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::config::LanguagesConfig;
use crate::error::{BacktransError, Result};

/// Provider codes for one run, resolved once and never changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSelection {
    pub name: String,
    /// Target code understood by the forward provider
    pub forward_code: String,
    /// Code the back provider uses for the translated text
    pub back_code: String,
}

impl LanguageSelection {
    pub fn from_codes(forward_code: impl Into<String>, back_code: impl Into<String>) -> Self {
        let forward_code = forward_code.into();
        Self {
            name: forward_code.clone(),
            forward_code,
            back_code: back_code.into(),
        }
    }
}

/// Human-readable language names mapped to each provider's codes
#[derive(Debug, Clone, Default)]
pub struct LanguageMaps {
    forward: BTreeMap<String, String>,
    back: BTreeMap<String, String>,
}

impl LanguageMaps {
    pub fn new(forward: BTreeMap<String, String>, back: BTreeMap<String, String>) -> Self {
        Self { forward, back }
    }

    pub fn load(config: &LanguagesConfig) -> Result<Self> {
        Ok(Self {
            forward: load_map(&config.deepl_map)?,
            back: load_map(&config.google_map)?,
        })
    }

    /// Names present in both maps, sorted
    pub fn names(&self) -> Vec<&str> {
        self.forward
            .keys()
            .filter(|name| self.back.contains_key(*name))
            .map(String::as_str)
            .collect()
    }

    pub fn resolve(&self, name: &str) -> Result<LanguageSelection> {
        let forward_code = self.forward.get(name).ok_or_else(|| {
            BacktransError::Language(format!("'{}' has no forward-translation code", name))
        })?;
        let back_code = self.back.get(name).ok_or_else(|| {
            BacktransError::Language(format!("'{}' has no back-translation code", name))
        })?;

        Ok(LanguageSelection {
            name: name.to_string(),
            forward_code: forward_code.clone(),
            back_code: back_code.clone(),
        })
    }
}

fn load_map(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BacktransError::Language(format!("Failed to read language map {}: {}", path.display(), e))
    })?;
    let map: BTreeMap<String, String> = serde_json::from_str(&content)?;
    debug!("Loaded {} languages from {}", map.len(), path.display());
    Ok(map)
}
