//! Service calls over the REST API

use async_trait::async_trait;
use ha_core::ServiceCall;
use reqwest::{header, Client};
use tracing::{debug, instrument, warn};

use crate::error::RemoteResult;

/// Something that can execute a service call
#[async_trait]
pub trait ServiceCaller: Send + Sync {
    async fn call_service(&self, call: &ServiceCall) -> RemoteResult<()>;
}

/// REST client for a Home Assistant instance
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(base_url: &str, token: Option<String>) -> RemoteResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `http(s)://host/api/services/<domain>/<service>`
    pub fn service_url(&self, domain: &str, service: &str) -> String {
        format!("{}/api/services/{}/{}", self.base_url, domain, service)
    }
}

#[async_trait]
impl ServiceCaller for RestClient {
    /// POST the service data; the response body is not inspected
    #[instrument(skip(self, call), fields(service = %call.service_id()))]
    async fn call_service(&self, call: &ServiceCall) -> RemoteResult<()> {
        let url = self.service_url(&call.domain, &call.service);
        let mut request = self.client.post(&url).json(&call.service_data);

        if let Some(ref token) = self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(%status, "Service call accepted");
        } else {
            warn!(%status, url = %url, "Home Assistant rejected service call");
        }
        Ok(())
    }
}
