//! Workers - the two network collaborators: language model and query proxy

pub mod llm_worker;
pub mod query_worker;

pub use llm_worker::{CompletionBackend, LLMWorker};
pub use query_worker::{QueryExecutor, QueryWorker, Row};

use std::time::Duration;
use tracing::warn;

/// HTTP client with a whole-request timeout. A builder failure is logged and
/// a plain client is used; the caller's own deadline still bounds each call.
pub(crate) fn timed_http_client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!("HTTP client with {} ms timeout could not be built ({}); using defaults", timeout.as_millis(), e);
            reqwest::Client::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_timed_client_gives_up_on_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let client = timed_http_client(Duration::from_millis(50));
        let started = Instant::now();
        let err = client.get(format!("http://{}/rules.txt", addr)).send().await.unwrap_err();
        assert!(err.is_timeout(), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        hold.abort();
    }
}
