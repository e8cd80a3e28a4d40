use crate::domain::delta::ReconcilePolicy;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;

pub const DEFAULT_NOKO_API_BASE_URL: &str = "https://api.nokotime.com/v2/";
pub const DEFAULT_USER_AGENT: &str = "keepi/1.0";
pub const DEFAULT_MINIMUM_REQUEST_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_noko_api_base_url")]
    pub noko_api_base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_minimum_request_interval_ms")]
    pub minimum_request_interval_ms: u64,
    #[serde(default)]
    pub reconcile_policy: ReconcilePolicy,
    #[serde(default)]
    pub default_user_id: Option<i64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            noko_api_base_url: default_noko_api_base_url(),
            user_agent: default_user_agent(),
            minimum_request_interval_ms: default_minimum_request_interval_ms(),
            reconcile_policy: ReconcilePolicy::default(),
            default_user_id: None,
        }
    }
}

fn default_app_name() -> String {
    "Keepi".to_string()
}

fn default_noko_api_base_url() -> String {
    DEFAULT_NOKO_API_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_minimum_request_interval_ms() -> u64 {
    DEFAULT_MINIMUM_REQUEST_INTERVAL_MS
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([(
        APP_JSON,
        serde_json::json!({
            "schema": 1,
            "appName": "Keepi",
            "nokoApiBaseUrl": DEFAULT_NOKO_API_BASE_URL,
            "userAgent": DEFAULT_USER_AGENT,
            "minimumRequestIntervalMs": DEFAULT_MINIMUM_REQUEST_INTERVAL_MS,
            "reconcilePolicy": "replace_all",
            "defaultUserId": null
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let raw = read_config(&path)?;
    let config: AppConfig = serde_json::from_value(raw).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    if config.noko_api_base_url.trim().is_empty() {
        return Err(InfraError::InvalidConfig(
            "nokoApiBaseUrl must not be empty".to_string(),
        ));
    }
    Ok(config)
}

pub fn save_default_user_id(config_dir: &Path, user_id: Option<i64>) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    let mut app = read_config(&path)?;
    let object = app.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "defaultUserId".to_string(),
        user_id.map_or(serde_json::Value::Null, serde_json::Value::from),
    );
    write_config(&path, &app)
}
