//! REST client for the generation backend.
//!
//! Wraps job creation, job status, managed-image resolution and failure
//! reporting using [`reqwest`].

use serde_json::Value;

use crate::messages::{
    parse_image_resolution, parse_job_created, parse_status, CreateJobRequest, FailureReport,
    ImageResolution, MessageError, ResolveSize, StatusReport,
};

/// HTTP client for the generation backend.
#[derive(Debug, Clone)]
pub struct GenerationApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the backend REST layer, shared by every client in this crate.
#[derive(Debug, thiserror::Error)]
pub enum BackendApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response that refused the request or could not be understood.
    #[error(transparent)]
    Message(#[from] MessageError),
}

impl GenerationApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://studio.example.com`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a job-creation request and return the issued job id.
    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<String, BackendApiError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_url, request.path()))
            .json(request)
            .send()
            .await?;

        let body: Value = parse_response(response).await?;
        Ok(parse_job_created(body)?)
    }

    /// Fetch the current status of a job.
    ///
    /// Sends `GET /api/generation/status/{job_id}`.
    pub async fn job_status(&self, job_id: &str) -> Result<StatusReport, BackendApiError> {
        let response = self
            .client
            .get(format!("{}/api/generation/status/{}", self.api_url, job_id))
            .send()
            .await?;

        let body: Value = parse_response(response).await?;
        Ok(parse_status(body)?)
    }

    /// Look up display URLs for a managed image.
    ///
    /// Sends `GET /api/generation/image-resolve/{image_id}?size=...`.
    pub async fn resolve_image(
        &self,
        image_id: &str,
        size: ResolveSize,
    ) -> Result<ImageResolution, BackendApiError> {
        let response = self
            .client
            .get(format!(
                "{}/api/generation/image-resolve/{}",
                self.api_url, image_id
            ))
            .query(&[("size", size.as_str())])
            .send()
            .await?;

        let body: Value = parse_response(response).await?;
        Ok(parse_image_resolution(body)?)
    }

    /// Tell the backend a job was abandoned so it can refund credits.
    ///
    /// Sends `POST /api/generation/handle-failure`.
    pub async fn report_failure(&self, report: &FailureReport) -> Result<(), BackendApiError> {
        let response = self
            .client
            .post(format!("{}/api/generation/handle-failure", self.api_url))
            .json(report)
            .send()
            .await?;

        check_status(response).await
    }
}

// ---- shared response helpers ----

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a [`BackendApiError::ApiError`] containing
/// the status and body text on failure.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(BackendApiError::ApiError {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BackendApiError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

/// Assert the response has a success status code, discarding the body.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<(), BackendApiError> {
    ensure_success(response).await?;
    Ok(())
}
