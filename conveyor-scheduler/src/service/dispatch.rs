//! Build dispatch
//!
//! Hands a freshly created build to whatever executes it. The scheduler only
//! needs to know whether the handoff was accepted; execution results come back
//! through the build-finish endpoint.

use async_trait::async_trait;
use conveyor_core::dto::build::BuildRequest;
use reqwest::Client;
use thiserror::Error;

/// Errors raised while handing a build to the executor
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request to executor failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("executor rejected build {build_id}: {status} - {body}")]
    Rejected {
        build_id: i64,
        status: u16,
        body: String,
    },
}

/// Sends builds off for execution
#[async_trait]
pub trait BuildDispatcher: Send + Sync {
    /// Dispatches one build
    ///
    /// An error leaves the build undispatched; the caller marks it errored.
    async fn dispatch_build(&self, request: &BuildRequest) -> Result<(), DispatchError>;
}

/// Dispatcher posting builds to an executor's HTTP API
pub struct HttpBuildDispatcher {
    client: Client,
    executor_url: String,
}

impl HttpBuildDispatcher {
    /// Creates a dispatcher for the executor at `executor_url`
    /// (e.g., "http://localhost:8081")
    pub fn new(executor_url: String) -> Self {
        Self {
            client: Client::new(),
            executor_url: executor_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BuildDispatcher for HttpBuildDispatcher {
    async fn dispatch_build(&self, request: &BuildRequest) -> Result<(), DispatchError> {
        let url = format!("{}/api/builds", self.executor_url);

        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                build_id: request.build_id,
                status,
                body,
            });
        }

        tracing::debug!("Build {} accepted by executor", request.build_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_url_trailing_slash_is_trimmed() {
        let dispatcher = HttpBuildDispatcher::new("http://executor:8081/".to_string());
        assert_eq!(dispatcher.executor_url, "http://executor:8081");
    }

    #[test]
    fn test_rejection_message() {
        let err = DispatchError::Rejected {
            build_id: 4,
            status: 503,
            body: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "executor rejected build 4: 503 - busy");
    }
}
