//! JSON-over-HTTP plumbing shared by the drivers.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DriverError, Result};

/// A base URL, a client with a timeout and an optional `Authorization` value.
pub(crate) struct HttpBackend {
    client: Client,
    base: Url,
    authorization: Option<String>,
}

impl HttpBackend {
    /// The endpoint is treated as a directory: a missing trailing slash is
    /// added so routes resolve beneath it.
    pub(crate) fn new(
        endpoint: &str,
        authorization: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        let base = Url::parse(&normalized).map_err(|e| DriverError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base,
            authorization,
        })
    }

    pub(crate) fn endpoint(&self) -> &str {
        self.base.as_str()
    }

    #[cfg(test)]
    pub(crate) fn has_authorization(&self) -> bool {
        self.authorization.is_some()
    }

    pub(crate) fn url(&self, route: &'static str) -> Result<Url> {
        self.base
            .join(route)
            .map_err(|e| DriverError::InvalidEndpoint {
                endpoint: self.base.to_string(),
                reason: e.to_string(),
            })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(value) => request.header("Authorization", value),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        route: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(route, status = status.as_u16(), "backend request rejected");
            return Err(DriverError::Status {
                route,
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| DriverError::Decode { route, source })
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, route: &'static str) -> Result<T> {
        let url = self.url(route)?;
        self.send(route, self.client.get(url)).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        route: &'static str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(route)?;
        self.send(route, self.client.post(url).json(body)).await
    }

    /// GET `route`; true on a 2xx answer whose body matches `expect`, if given.
    /// Transport failures count as false.
    pub(crate) async fn answers(&self, route: &'static str, expect: Option<&str>) -> bool {
        let Ok(url) = self.url(route) else {
            return false;
        };
        let response = match self.authorize(self.client.get(url)).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(route, error = %err, "backend unreachable");
                return false;
            }
        };
        if !response.status().is_success() {
            return false;
        }
        match expect {
            Some(expected) => response.text().await.is_ok_and(|body| body == expected),
            None => true,
        }
    }
}
