use anyhow::{anyhow, Context, Result};
use mag7_warehouse::simfin::{SimFin, BASE_URL, REQUEST_INTERVAL};
use std::path::PathBuf;
use std::time::Duration;

pub static DEFAULT_MODEL: &str = "mag7_final_model.json";

/// Runtime configuration, read from the environment (and `.env`) then
/// overridden by command line flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_interval: Duration,
    pub model_path: PathBuf,
    pub user_agent: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let request_interval = match var("SIMFIN_REQUEST_INTERVAL_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("SIMFIN_REQUEST_INTERVAL_MS is not a number: {ms}"))?,
            ),
            None => REQUEST_INTERVAL,
        };

        Ok(Settings {
            api_key: var("SIMFIN_API_KEY").filter(|key| !key.trim().is_empty()),
            base_url: var("SIMFIN_BASE_URL").unwrap_or_else(|| BASE_URL.to_string()),
            request_interval,
            model_path: var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL)),
            user_agent: var("USER_AGENT"),
        })
    }

    /// Apply command line overrides.
    pub fn with_overrides(mut self, api_key: Option<String>, model_path: Option<PathBuf>) -> Self {
        if let Some(key) = api_key {
            self.api_key = Some(key);
        }
        if let Some(path) = model_path {
            self.model_path = path;
        }
        self
    }

    /// Build the SimFin client; an API key is required.
    pub fn simfin(&self) -> Result<SimFin> {
        let key = self.api_key.as_ref().ok_or_else(|| {
            anyhow!("Please enter your SimFin API key to proceed (--api-key or $SIMFIN_API_KEY)")
        })?;

        let mut builder = SimFin::builder(key)
            .base_url(&self.base_url)
            .request_interval(self.request_interval);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent);
        }
        builder.build()
    }
}
