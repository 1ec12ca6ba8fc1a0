use std::time::Duration;

use crate::error::Error;

/// Connection settings for the remote store.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the store API, e.g. `https://api.example.com`.
    pub server_url: String,
    pub app_id: String,
    pub app_key: String,
    /// Only needed for requests made with `AuthOption::UseMasterKey`.
    pub master_key: Option<String>,
    /// Whole-request timeout for store round trips.
    pub request_timeout: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(
        server_url: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            app_id: app_id.into(),
            app_key: app_key.into(),
            master_key: None,
            request_timeout: Duration::from_secs(15),
        }
    }

    /// Loads settings from `API_SERVER`, `APP_ID`, `APP_KEY` and the
    /// optional `APP_MASTER_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing variable.
    pub fn from_env() -> Result<Self, Error> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{name} is not set")))
        };
        let mut config = Self::new(required("API_SERVER")?, required("APP_ID")?, required("APP_KEY")?);
        config.master_key = std::env::var("APP_MASTER_KEY").ok();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_no_master_key_and_default_timeout() {
        let config = ClientConfig::new("https://api.example.com", "id", "key");
        assert!(config.master_key.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(15));
    }
}
