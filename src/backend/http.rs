use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{BackendApi, BackendError};
use crate::identity::ProfileRecord;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyAdminResponse {
    is_admin: bool,
}

/// reqwest-backed client for the marketplace REST backend.
#[derive(Clone)]
pub struct HttpBackend {
    base: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self::with_client(base, client))
    }

    pub fn with_client(base: &str, client: reqwest::Client) -> Self {
        Self { base: base.trim_end_matches('/').to_string(), client }
    }

    pub fn base_url(&self) -> &str { &self.base }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base, path) }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        bearer: &str,
        body: &T,
    ) -> Result<reqwest::Response, BackendError> {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = resp.status();
        debug!(target: "backend", path, status = status.as_u16(), "backend response");
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        Ok(resp)
    }
}

impl BackendApi for HttpBackend {
    fn verify_admin<'a>(&'a self, bearer: &'a str) -> BoxFuture<'a, Result<bool, BackendError>> {
        async move {
            let resp = self.post_json("/verify-admin", bearer, &serde_json::json!({})).await?;
            let body: VerifyAdminResponse = resp.json().await.map_err(|e| BackendError::Decode(e.to_string()))?;
            Ok(body.is_admin)
        }
        .boxed()
    }

    fn upsert_profile<'a>(&'a self, bearer: &'a str, profile: &'a ProfileRecord) -> BoxFuture<'a, Result<(), BackendError>> {
        async move {
            self.post_json("/users/profile", bearer, profile).await?;
            Ok(())
        }
        .boxed()
    }
}
