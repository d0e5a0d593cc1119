//! [`JobBackend`] over the geoqueue REST API.

use geoqueue_jobs::{BackendFuture, JobBackend, JobError, JobRequest, JobTicket};
use geoqueue_protocol::ItemRecord;

/// REST client for job submission and queue snapshots.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: String,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, base: &str) -> anyhow::Result<Self> {
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            anyhow::bail!("API base must be an http(s) URL, got `{base}`");
        }
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }
}

fn http_error(action: &str, e: reqwest::Error) -> JobError {
    JobError::Backend(format!("{action}: {e}"))
}

impl JobBackend for HttpBackend {
    fn enqueue(&self, request: JobRequest) -> BackendFuture<'_, JobTicket> {
        Box::pin(async move {
            let url = self.url("jobs/");
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| http_error("enqueue", e))?;

            if !response.status().is_success() {
                return Err(JobError::Backend(format!(
                    "enqueue {} returned status {}",
                    request.kind(),
                    response.status()
                )));
            }
            response
                .json::<JobTicket>()
                .await
                .map_err(|e| http_error("decode job ticket", e))
        })
    }

    fn fetch_items(&self) -> BackendFuture<'_, Vec<ItemRecord>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url("items/"))
                .send()
                .await
                .map_err(|e| http_error("fetch items", e))?;

            if !response.status().is_success() {
                return Err(JobError::Backend(format!(
                    "fetch items returned status {}",
                    response.status()
                )));
            }
            response
                .json::<Vec<ItemRecord>>()
                .await
                .map_err(|e| http_error("decode items", e))
        })
    }
}
