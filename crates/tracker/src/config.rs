use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use slot_scan::ScanConfig;

/// Errors raised while reading start-up configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A variable exists but could not be parsed.
    #[error("Invalid value for {name}: {reason}")]
    InvalidVar {
        /// The variable name.
        name: &'static str,
        /// Why it could not be used.
        reason: String,
    },

    /// The locations file could not be read or parsed.
    #[error("Failed to load locations file {path}: {reason}")]
    Locations {
        /// File path that was attempted.
        path: String,
        /// Why it could not be used.
        reason: String,
    },
}

/// Everything the binaries read from the environment.
#[derive(Debug)]
pub struct AppConfig {
    /// Slack incoming-webhook URL for notifications.
    pub slack_webhook: String,

    /// Scan pipeline configuration (base URL, locations, intervals).
    pub scan: ScanConfig,

    /// Path to trained CAPTCHA model weights, when the neural engine is used.
    pub neural_model_path: Option<PathBuf>,

    /// Tesseract binary used as the fallback OCR engine.
    pub tesseract_binary: PathBuf,

    /// WebDriver endpoint for the booking binary.
    pub webdriver_url: String,

    /// Page the booking binary drives.
    pub target_url: String,
}

impl AppConfig {
    /// Read configuration from the environment. `LOCATIONS_FILE` points at a
    /// JSON object of display name -> location code.
    pub fn from_env() -> Result<Self, ConfigError> {
        let slack_webhook =
            env::var("SLACK_WEBHOOK").map_err(|_| ConfigError::MissingVar("SLACK_WEBHOOK"))?;

        let locations_file =
            env::var("LOCATIONS_FILE").unwrap_or_else(|_| "locations.json".to_string());
        let locations = load_locations(&locations_file)?;

        let mut scan = ScanConfig {
            locations,
            ..ScanConfig::default()
        };

        if let Ok(base_url) = env::var("BASE_URL") {
            scan.base_url = base_url;
        }
        if let Some(days) = parse_var::<u32>("DAYS_AHEAD")? {
            scan.days_ahead = days;
        }
        if let Some(start) = parse_time_var("FAST_WINDOW_START")? {
            scan.fast_window_start = start;
        }
        if let Some(end) = parse_time_var("FAST_WINDOW_END")? {
            scan.fast_window_end = end;
        }
        if let Some(secs) = parse_var::<u64>("FAST_INTERVAL_SECS")? {
            scan.fast_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("NORMAL_INTERVAL_SECS")? {
            scan.normal_interval = Duration::from_secs(secs);
        }

        Ok(Self {
            slack_webhook,
            scan,
            neural_model_path: env::var("NEURAL_MODEL_PATH").ok().map(PathBuf::from),
            tesseract_binary: env::var("TESSERACT_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tesseract")),
            webdriver_url: env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_string()),
            target_url: env::var("TARGET_URL").unwrap_or_default(),
        })
    }
}

fn load_locations(path: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Locations {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    serde_json::from_str(&contents).map_err(|e| ConfigError::Locations {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidVar {
                name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_time_var(name: &'static str) -> Result<Option<NaiveTime>, ConfigError> {
    match env::var(name) {
        Ok(raw) => NaiveTime::parse_from_str(&raw, "%H:%M")
            .map(Some)
            .map_err(|e| ConfigError::InvalidVar {
                name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_file_parses_name_to_code_map() {
        let dir = std::env::temp_dir();
        let path = dir.join("tracker_locations_test.json");
        std::fs::write(&path, r#"{"Kathmandu": "77", "Pokhara": "12"}"#).unwrap();

        let locations = load_locations(path.to_str().unwrap()).unwrap();
        assert_eq!(locations.get("Kathmandu").map(String::as_str), Some("77"));
        assert_eq!(locations.len(), 2);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_locations_file_is_an_error() {
        let result = load_locations("/nonexistent/locations.json");
        assert!(matches!(result, Err(ConfigError::Locations { .. })));
    }
}
