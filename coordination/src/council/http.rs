//! HTTP expert: a council member served by a remote endpoint.
//!
//! `predict` POSTs the context pack as JSON to `<endpoint>/predict`;
//! `repair` POSTs `{pack, prior, violations}` to `<endpoint>/repair`. Both
//! expect a `PredictionBundle` back.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::bundle::PredictionBundle;
use crate::context_packer::ContextPack;
use crate::verifier::Violation;

use super::{ExpertError, ExpertUnit};

#[derive(Serialize)]
struct RepairRequest<'a> {
    pack: &'a ContextPack,
    prior: &'a PredictionBundle,
    violations: &'a [Violation],
}

/// Expert reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExpert {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpExpert {
    /// Create a client for `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ExpertError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExpertError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<PredictionBundle, ExpertError> {
        let url = format!("{}/{}", self.endpoint, path);
        debug!(url = %url, "posting to expert");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ExpertError::Unavailable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "expert returned error status");
            return Err(ExpertError::Unavailable(format!(
                "{} returned {}: {}",
                url, status, text
            )));
        }

        response
            .json::<PredictionBundle>()
            .await
            .map_err(|e| ExpertError::Malformed(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl ExpertUnit for HttpExpert {
    async fn predict(&self, pack: &ContextPack) -> Result<PredictionBundle, ExpertError> {
        self.post("predict", pack).await
    }

    async fn repair(
        &self,
        pack: &ContextPack,
        prior: &PredictionBundle,
        violations: &[Violation],
    ) -> Result<PredictionBundle, ExpertError> {
        let request = RepairRequest {
            pack,
            prior,
            violations,
        };
        self.post("repair", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleSummary, CategoryPrediction, PredictionValue};
    use crate::event::Event;
    use crate::registry::{CategoryDescriptor, CategoryRegistry};
    use chrono::{TimeZone, Utc};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn pack() -> ContextPack {
        let registry = CategoryRegistry::new(
            vec![CategoryDescriptor::enumerated("winner", ["home", "away"])],
            vec![],
            "winner",
        )
        .unwrap();
        let scheduled = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();
        ContextPack {
            expert_id: "remote".into(),
            event: Event::new("evt-1", "home", "away", scheduled),
            memories: vec![],
            knowledge: vec![],
            registry,
            alpha: 0.7,
            top_k: 10,
            assembled_at: scheduled,
        }
    }

    fn bundle() -> PredictionBundle {
        PredictionBundle {
            expert_id: "remote".into(),
            event_id: "evt-1".into(),
            predictions: vec![CategoryPrediction::new(
                "winner",
                PredictionValue::Enumerated("home".into()),
                0.7,
            )],
            summary: BundleSummary {
                primary_outcome: "home".into(),
                outcome_probability: 0.6,
                aggregate_confidence: 0.7,
            },
        }
    }

    /// Serve a single canned response, returning the request line.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{}/", addr), handle)
    }

    /// Read headers plus a content-length body.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    #[tokio::test]
    async fn test_predict_decodes_bundle() {
        let body = serde_json::to_string(&bundle()).unwrap();
        let (endpoint, server) = serve_once("200 OK", body).await;
        let expert = HttpExpert::new(endpoint, Duration::from_secs(5)).unwrap();

        let result = expert.predict(&pack()).await.unwrap();
        assert_eq!(result, bundle());
        assert_eq!(server.await.unwrap(), "POST /predict HTTP/1.1");
    }

    #[tokio::test]
    async fn test_repair_posts_to_repair_path() {
        let body = serde_json::to_string(&bundle()).unwrap();
        let (endpoint, server) = serve_once("200 OK", body).await;
        let expert = HttpExpert::new(endpoint, Duration::from_secs(5)).unwrap();

        let violations = vec![Violation::MissingCategory {
            category_id: "winner".into(),
        }];
        expert.repair(&pack(), &bundle(), &violations).await.unwrap();
        assert_eq!(server.await.unwrap(), "POST /repair HTTP/1.1");
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let (endpoint, _server) = serve_once("503 Service Unavailable", "{}".into()).await;
        let expert = HttpExpert::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = expert.predict(&pack()).await.unwrap_err();
        assert!(matches!(err, ExpertError::Unavailable(_)), "{err}");
    }

    #[tokio::test]
    async fn test_undecodable_body_is_malformed() {
        let (endpoint, _server) = serve_once("200 OK", r#"{"verdict":"home"}"#.into()).await;
        let expert = HttpExpert::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = expert.predict(&pack()).await.unwrap_err();
        assert!(matches!(err, ExpertError::Malformed(_)), "{err}");
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let expert = HttpExpert::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        let err = expert.predict(&pack()).await.unwrap_err();
        assert!(matches!(err, ExpertError::Unavailable(_)));
    }
}
