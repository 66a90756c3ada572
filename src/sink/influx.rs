use super::{MetricSink, Point};
use crate::config::SinkConfig;
use crate::error::SinkError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// InfluxDB 1.x HTTP writer, one request per point.
#[derive(Clone)]
pub struct InfluxSink {
    client: Client,
    server: String,
    write_url: String,
}

impl InfluxSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let server = format!("{}:{}", config.server, config.port);
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| SinkError::Transport {
                server: server.clone(),
                source,
            })?;
        Ok(Self {
            client,
            write_url: format!(
                "http://{}/write?db={}&precision=ms",
                server, config.database
            ),
            server,
        })
    }
}

#[async_trait]
impl MetricSink for InfluxSink {
    async fn write_point(&self, point: &Point) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.write_url)
            .body(point.to_line_protocol())
            .send()
            .await
            .map_err(|source| SinkError::Transport {
                server: self.server.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status=%status, body=%body, "influx write returned non-204");
            return Err(SinkError::Status {
                server: self.server.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
