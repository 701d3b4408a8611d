use std::time::Duration;

use async_trait::async_trait;
use sweep_core::DeviceUpdate;
use sweep_engine::{
    DeviceRegistry,
    RegistryError,
};

/// A `DeviceRegistry` that `POST`s each `DeviceUpdate` as JSON to
/// `{base_url}/devices` using `reqwest` (§6 `DeviceRegistry::UpdateDevice`;
/// query operations are explicitly out of scope for the core).
pub struct HttpDeviceRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDeviceRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(if timeout.is_zero() { Duration::from_secs(5) } else { timeout })
            .build()
            .expect("reqwest client configuration is static and known-valid");

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    async fn update_device(&self, update: DeviceUpdate) -> Result<(), RegistryError> {
        let url = format!("{}/devices", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&update)
            .send()
            .await
            .map_err(|e| RegistryError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RegistryError::Failed(format!("registry responded with status {}", response.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized_without_trailing_slash_duplication() {
        let registry = HttpDeviceRegistry::new("http://localhost:8080/", Duration::from_secs(1));
        assert_eq!(registry.base_url, "http://localhost:8080/");
        assert_eq!(format!("{}/devices", registry.base_url.trim_end_matches('/')), "http://localhost:8080/devices");
    }
}
