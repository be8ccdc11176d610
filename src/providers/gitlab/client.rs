mod hierarchy;

use std::time::Duration;

use log::debug;
use reqwest::{Client, Method};
use serde_json::Value;
use url::Url;

use crate::auth::Token;
use crate::error::{ConvergeError, Result};
use crate::model::EntityKind;

pub(crate) const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Typed access to the GitLab REST API (v4).
///
/// A non-success status is returned as [`ConvergeError::Remote`]; the client
/// never retries, caches or batches. The underlying `reqwest::Client` is only
/// read after construction, so one instance is shared by all workers.
pub struct GitLabClient {
    client: Client,
    api_url: Url,
    token: Option<Token>,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: Option<Token>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("glconverge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ConvergeError::Policy(format!("Failed to create HTTP client: {e}")))?;

        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        let api_url = Url::parse(&base)
            .map_err(|e| ConvergeError::Policy(format!("Invalid base URL: {e}")))?
            .join("api/v4/")
            .map_err(|e| ConvergeError::Policy(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    pub fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self
            .api_url
            .join(path)
            .map_err(|e| ConvergeError::Api(format!("Invalid request path {path}: {e}")))?;

        debug!("{method} {url}");

        let mut request = self
            .auth_request(self.client.request(method.clone(), url))
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(ConvergeError::Remote {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Lists every record of a sub-resource, following `page` until a short page.
    pub async fn list_paged(
        &self,
        kind: EntityKind,
        parent_id: u64,
        resource: &str,
    ) -> Result<Vec<Value>> {
        let path = resource_path(kind, parent_id, resource);
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let query = [("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())];
            let response = self.request(Method::GET, &path, &query, None).await?;

            let Value::Array(batch) = response else {
                return Err(ConvergeError::Api(format!(
                    "Expected a JSON array from {path}, got {response}"
                )));
            };

            let fetched = batch.len();
            records.extend(batch);

            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} records from {path}", records.len());
        Ok(records)
    }

    /// Reads one entity by numeric ID or full path.
    pub async fn get(&self, kind: EntityKind, identifier: &str) -> Result<Value> {
        let path = format!("{}/{}", kind.resource(), urlencoding::encode(identifier));
        self.request(Method::GET, &path, &[], None).await
    }

    pub async fn create(
        &self,
        kind: EntityKind,
        id: u64,
        resource: &str,
        payload: &Value,
    ) -> Result<Value> {
        let path = resource_path(kind, id, resource);
        self.request(Method::POST, &path, &[], Some(payload)).await
    }

    /// `PUT` on a sub-resource, or on the entity itself when `resource` is empty.
    pub async fn update(
        &self,
        kind: EntityKind,
        id: u64,
        resource: &str,
        query: &[(&str, String)],
        payload: &Value,
    ) -> Result<Value> {
        let path = resource_path(kind, id, resource);
        self.request(Method::PUT, &path, query, Some(payload)).await
    }

    pub async fn delete(
        &self,
        kind: EntityKind,
        id: u64,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<()> {
        let path = resource_path(kind, id, resource);
        self.request(Method::DELETE, &path, query, None).await?;
        Ok(())
    }
}

fn resource_path(kind: EntityKind, id: u64, resource: &str) -> String {
    if resource.is_empty() {
        format!("{}/{id}", kind.resource())
    } else {
        format!("{}/{id}/{resource}", kind.resource())
    }
}

/// Numeric `id` of an API record.
pub(crate) fn record_id(record: &Value) -> Result<u64> {
    record
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| ConvergeError::Api(format!("record without numeric id: {record}")))
}
