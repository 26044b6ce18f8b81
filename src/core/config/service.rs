use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::paths::AppPaths;
use crate::core::errors::ApiError;

/// Web search credentials and fetch limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub engine_id: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_page_chars")]
    pub max_page_chars: usize,
}

/// Generation provider selection and prompt template.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_instruction")]
    pub instruction: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub search: SearchConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_max_results() -> usize {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_page_chars() -> usize {
    8_000
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_instruction() -> String {
    "Answer the question using only the sources above. \
     Cite the URLs of the sources you relied on."
        .to_string()
}

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("SIBYL_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Merged raw configuration: public config with secrets layered on top.
    pub fn load_value(&self) -> Value {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        deep_merge(&public_config, &secrets_config)
    }

    /// Typed configuration. Missing required credentials are an error here,
    /// which makes them fatal at startup.
    pub fn load(&self) -> Result<AppConfig, ApiError> {
        let value = self.load_value();
        let config: AppConfig = serde_json::from_value(value)
            .map_err(|err| ApiError::BadRequest(format!("invalid configuration: {err}")))?;
        validate_config(&config)?;
        Ok(config)
    }
}

fn validate_config(config: &AppConfig) -> Result<(), ApiError> {
    if config.search.api_key.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "search.api_key is required".to_string(),
        ));
    }
    if config.search.engine_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "search.engine_id is required".to_string(),
        ));
    }
    if config.llm.api_key.trim().is_empty() {
        return Err(ApiError::BadRequest("llm.api_key is required".to_string()));
    }
    let base_url_missing = config
        .llm
        .base_url
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty();
    if config.llm.provider == "openai_compat" && base_url_missing {
        return Err(ApiError::BadRequest(
            "llm.base_url is required for the openai_compat provider".to_string(),
        ));
    }
    Ok(())
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => Value::Object(Map::new()),
            Err(err) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(err) => {
            tracing::warn!("Failed to read {}: {}", path.display(), err);
            Value::Object(Map::new())
        }
    }
}

fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let entry = merged
                    .get(key)
                    .map(|base_value| deep_merge(base_value, overlay_value))
                    .unwrap_or_else(|| overlay_value.clone());
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_prefers_overlay_scalars() {
        let base = json!({"llm": {"model": "a", "provider": "gemini"}});
        let overlay = json!({"llm": {"model": "b"}});
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged["llm"]["model"], "b");
        assert_eq!(merged["llm"]["provider"], "gemini");
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let value = json!({
            "search": {"api_key": "k", "engine_id": ""},
            "llm": {"api_key": "k"}
        });
        let config: AppConfig = serde_json::from_value(value).unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("search.engine_id"));
    }

    #[test]
    fn defaults_are_applied() {
        let value = json!({
            "search": {"api_key": "k", "engine_id": "cx"},
            "llm": {"api_key": "k"}
        });
        let config: AppConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.llm.provider, "gemini");
        assert!(config.server.cors_allowed_origins.is_empty());
    }
}
