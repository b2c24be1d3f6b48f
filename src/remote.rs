//! HTTP client for the remote event store.
//!
//! [`RemoteStore`] is the seam the sync engine and tracker talk
//! through, so tests can substitute an in-memory or always-failing
//! transport. [`RemoteClient`] is the production implementation over
//! reqwest; the exit-path flush deliberately uses a separate blocking
//! client on its own thread, since the async runtime may already be
//! tearing down when it runs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::time::Duration;

use crate::api::{AppendResponse, DeleteResponse, EventsResponse, PatchRequest, PatchResponse};
use crate::event::{MetadataFields, PatchKind, PlayEvent};
use crate::namespace::{NamespaceCredentials, PROOF_HEADER};

const EXIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything the client side needs from the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn send_batch(
        &self,
        creds: &NamespaceCredentials,
        events: &[PlayEvent],
    ) -> Result<AppendResponse>;

    async fn fetch_range(
        &self,
        creds: &NamespaceCredentials,
        from: i64,
        to: i64,
    ) -> Result<Vec<PlayEvent>>;

    async fn patch_metadata(
        &self,
        creds: &NamespaceCredentials,
        kind: PatchKind,
        target_id: &str,
        fields: &MetadataFields,
    ) -> Result<usize>;

    async fn delete_all(&self, creds: &NamespaceCredentials) -> Result<usize>;

    /// Best-effort synchronous send for process teardown. Must not
    /// rely on the async transport; errors are swallowed by callers.
    fn flush_blocking(&self, creds: &NamespaceCredentials, events: &[PlayEvent]) -> Result<()>;
}

pub struct RemoteClient {
    base_url: String,
    http_client: HttpClient,
}

impl RemoteClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {e}"))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn events_url(&self, namespace: &str) -> String {
        format!("{}/v1/{}/events", self.base_url, namespace)
    }

    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.http_client.get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("Health check failed: {}", response.status()))
        }
    }
}

#[async_trait]
impl RemoteStore for RemoteClient {
    async fn send_batch(
        &self,
        creds: &NamespaceCredentials,
        events: &[PlayEvent],
    ) -> Result<AppendResponse> {
        let response = self
            .http_client
            .post(self.events_url(&creds.key))
            .header(PROOF_HEADER, &creds.token)
            .json(&events)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(anyhow!("Batch upload rejected: {} - {}", status, body))
        }
    }

    async fn fetch_range(
        &self,
        creds: &NamespaceCredentials,
        from: i64,
        to: i64,
    ) -> Result<Vec<PlayEvent>> {
        let response = self
            .http_client
            .get(self.events_url(&creds.key))
            .header(PROOF_HEADER, &creds.token)
            .query(&[("from", from), ("to", to)])
            .send()
            .await?;

        if response.status().is_success() {
            let body: EventsResponse = response.json().await?;
            Ok(body.events)
        } else {
            let status = response.status();
            Err(anyhow!("Range query failed: {status}"))
        }
    }

    async fn patch_metadata(
        &self,
        creds: &NamespaceCredentials,
        kind: PatchKind,
        target_id: &str,
        fields: &MetadataFields,
    ) -> Result<usize> {
        let request = PatchRequest {
            target_kind: kind,
            target_id: target_id.to_string(),
            fields: fields.clone(),
        };
        let response = self
            .http_client
            .patch(format!("{}/metadata", self.events_url(&creds.key)))
            .header(PROOF_HEADER, &creds.token)
            .json(&request)
            .send()
            .await?;

        if response.status().is_success() {
            let body: PatchResponse = response.json().await?;
            Ok(body.patched)
        } else {
            let status = response.status();
            Err(anyhow!("Metadata patch failed: {status}"))
        }
    }

    async fn delete_all(&self, creds: &NamespaceCredentials) -> Result<usize> {
        let response = self
            .http_client
            .delete(self.events_url(&creds.key))
            .header(PROOF_HEADER, &creds.token)
            .send()
            .await?;

        if response.status().is_success() {
            let body: DeleteResponse = response.json().await?;
            Ok(body.deleted)
        } else {
            let status = response.status();
            Err(anyhow!("Delete failed: {status}"))
        }
    }

    fn flush_blocking(&self, creds: &NamespaceCredentials, events: &[PlayEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let url = self.events_url(&creds.key);
        let token = creds.token.clone();
        let batch = events.to_vec();

        // reqwest's blocking client cannot run on a tokio runtime
        // thread, and teardown may happen on one. A short-lived plain
        // thread sidesteps that and survives runtime shutdown.
        let handle = std::thread::spawn(move || -> Result<()> {
            let client = reqwest::blocking::Client::builder()
                .timeout(EXIT_FLUSH_TIMEOUT)
                .build()?;
            let response = client
                .post(url)
                .header(PROOF_HEADER, token)
                .json(&batch)
                .send()?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(anyhow!("Exit flush rejected: {}", response.status()))
            }
        });

        handle
            .join()
            .map_err(|_| anyhow!("Exit flush thread panicked"))?
    }
}
