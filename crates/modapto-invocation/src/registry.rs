//! Module registry lookups.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::{InvocationError, Result};

/// Resolves a (module, smart service) pair to the address its operations live under.
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    async fn resolve_service_address(&self, module_id: &str, smart_service_id: &str)
    -> Result<String>;
}

#[derive(Deserialize)]
struct ServiceAddress {
    address: String,
}

/// Registry reached over HTTP at
/// `GET {base}/api/modules/{module}/smart-services/{service}`.
pub struct HttpModuleRegistry {
    client: Client,
    base_url: String,
}

impl HttpModuleRegistry {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn lookup_url(&self, module_id: &str, smart_service_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            InvocationError::ServiceNotFound(format!("bad registry url {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                InvocationError::ServiceNotFound(format!("bad registry url {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(["api", "modules", module_id, "smart-services", smart_service_id]);
        Ok(url)
    }
}

#[async_trait]
impl ModuleRegistry for HttpModuleRegistry {
    async fn resolve_service_address(
        &self,
        module_id: &str,
        smart_service_id: &str,
    ) -> Result<String> {
        let url = self.lookup_url(module_id, smart_service_id)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InvocationError::Transport(format!("registry request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(InvocationError::ServiceNotFound(format!(
                "module {module_id} has no smart service {smart_service_id}"
            )));
        }
        if !status.is_success() {
            return Err(InvocationError::ServiceNotFound(format!(
                "registry returned {status} for {module_id}/{smart_service_id}"
            )));
        }

        let found: ServiceAddress = resp.json().await.map_err(|e| {
            InvocationError::ServiceNotFound(format!("registry response parse failed: {e}"))
        })?;
        Ok(found.address.trim_end_matches('/').to_string())
    }
}
