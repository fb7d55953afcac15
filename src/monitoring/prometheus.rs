//! Prometheus HTTP API client

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;

use super::window::RangeWindow;
use super::{Labels, MetricsSource, Point, Sample, Selector, Series};
use crate::error::{GatewayError, GatewayResult};

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VectorData {
    #[serde(default)]
    result: Vec<VectorItem>,
}

#[derive(Debug, Deserialize)]
struct VectorItem {
    #[serde(default)]
    metric: Labels,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixData {
    #[serde(default)]
    result: Vec<MatrixItem>,
}

#[derive(Debug, Deserialize)]
struct MatrixItem {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct PrometheusSource {
    client: reqwest::Client,
    base_url: String,
    call_timeout: Duration,
}

impl PrometheusSource {
    pub fn new(client: reqwest::Client, address: &str, call_timeout: Duration) -> GatewayResult<Self> {
        let base_url = address.trim().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            GatewayError::invalid(format!("invalid metrics address '{}': {}", address, e))
        })?;
        Ok(Self {
            client,
            base_url,
            call_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        // Headers and body share one budget; a body that stalls is a timeout.
        let fetch = async {
            let response = self
                .client
                .get(&url)
                .query(params)
                .send()
                .await
                .map_err(|e| {
                    GatewayError::Unavailable(format!(
                        "metrics backend {} is unavailable: {}",
                        self.base_url, e
                    ))
                })?;
            let status = response.status();
            let body: ApiResponse<T> = response.json().await.map_err(|e| {
                GatewayError::Unavailable(format!(
                    "metrics backend returned HTTP {} with an unreadable body: {}",
                    status.as_u16(),
                    e
                ))
            })?;
            Ok::<_, GatewayError>((status, body))
        };
        let (status, body) = match timeout(self.call_timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(GatewayError::timeout(&self.base_url, self.call_timeout)),
        };

        if body.status != "success" {
            let message = body.error.unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(if status.is_server_error() {
                GatewayError::Unavailable(format!("metrics query failed: {}", message))
            } else {
                GatewayError::Internal(format!("metrics query rejected: {}", message))
            });
        }
        body.data
            .ok_or_else(|| GatewayError::Internal("metrics response without data".to_string()))
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn instant(&self, selector: &Selector) -> GatewayResult<Vec<Sample>> {
        let query = selector.to_string();
        debug!(query = %query, "instant query");
        let data: VectorData = self.get("/api/v1/query", &[("query", query)]).await?;
        Ok(data
            .result
            .into_iter()
            .filter_map(|item| {
                parse_value(&item.value.1).map(|value| Sample {
                    labels: item.metric,
                    value,
                })
            })
            .collect())
    }

    async fn range(&self, selector: &Selector, window: &RangeWindow) -> GatewayResult<Vec<Series>> {
        let query = selector.to_string();
        debug!(query = %query, step = ?window.step, "range query");
        let params = [
            ("query", query),
            ("start", format!("{:.3}", window.start_ms as f64 / 1000.0)),
            ("end", format!("{:.3}", window.end_ms as f64 / 1000.0)),
            ("step", format!("{}s", window.step.as_secs().max(1))),
        ];
        let data: MatrixData = self.get("/api/v1/query_range", &params).await?;
        Ok(data
            .result
            .into_iter()
            .map(|item| Series {
                labels: item.metric,
                points: item
                    .values
                    .into_iter()
                    .filter_map(|(timestamp, raw)| {
                        parse_value(&raw).map(|value| Point { timestamp, value })
                    })
                    .collect(),
            })
            .collect())
    }

    async fn ready(&self) -> GatewayResult<()> {
        let url = format!("{}/-/healthy", self.base_url);
        match timeout(self.call_timeout, self.client.get(&url).send()).await {
            Ok(Ok(r)) if r.status().is_success() => Ok(()),
            Ok(Ok(r)) => Err(GatewayError::Unavailable(format!(
                "metrics backend {} is not healthy: HTTP {}",
                self.base_url,
                r.status().as_u16()
            ))),
            Ok(Err(e)) => Err(GatewayError::Unavailable(format!(
                "metrics backend {} is unreachable: {}",
                self.base_url, e
            ))),
            Err(_) => Err(GatewayError::timeout(&self.base_url, self.call_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_vector() {
        let raw = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"__name__":"kantaloupe_cluster_cpu_total","cluster":"c1"},"value":[1700000000.5,"64"]},
            {"metric":{"cluster":"c2"},"value":[1700000000.5,"NaN"]}
        ]}}"#;
        let resp: ApiResponse<VectorData> = serde_json::from_str(raw).unwrap();
        let data = resp.data.unwrap();
        assert_eq!(data.result.len(), 2);
        assert_eq!(parse_value(&data.result[0].value.1), Some(64.0));
        assert_eq!(parse_value(&data.result[1].value.1), None);
    }

    #[test]
    fn test_decode_matrix_and_error() {
        let raw = r#"{"status":"success","data":{"resultType":"matrix","result":[
            {"metric":{"node":"n1"},"values":[[1700000000,"1"],[1700000030,"2"]]}
        ]}}"#;
        let resp: ApiResponse<MatrixData> = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.data.unwrap().result[0].values.len(), 2);

        let raw = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let resp: ApiResponse<MatrixData> = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.status, "error");
        assert_eq!(resp.error.as_deref(), Some("parse error"));
    }

    #[test]
    fn test_rejects_bad_address() {
        let err = PrometheusSource::new(reqwest::Client::new(), "not a url", Duration::from_secs(1));
        assert!(err.is_err());
        let ok = PrometheusSource::new(
            reqwest::Client::new(),
            "http://prometheus:9090/",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(ok.base_url(), "http://prometheus:9090");
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        let source = PrometheusSource::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = source.ready().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stalled_body_is_a_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 1000\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(br#"{"status":"succ"#).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
        });

        let source = PrometheusSource::new(
            reqwest::Client::new(),
            &format!("http://{}", addr),
            Duration::from_millis(200),
        )
        .unwrap();
        let started = std::time::Instant::now();
        let err = source.instant(&Selector::new("up")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
