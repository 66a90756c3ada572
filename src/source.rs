use crate::document::Document;
use crate::error::SourceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Read access to the vehicle telemetry API.
#[async_trait]
pub trait VehicleApi: Send + Sync {
    /// The account's vehicle summary (`id`, `vin`, `state`, ...) for `vin`.
    async fn vehicle(&self, vin: &str) -> Result<Document, SourceError>;

    /// One `data_request` endpoint snapshot.
    async fn endpoint(&self, vehicle_id: i64, endpoint: &str) -> Result<Document, SourceError>;
}

pub fn vehicle_id(summary: &Document) -> Option<i64> {
    summary.get("id").and_then(|id| id.as_i64())
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

pub struct HttpVehicleApi {
    client: Client,
    base_url: String,
    access_token: String,
}

impl HttpVehicleApi {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    async fn get_response<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = format!("{}/api/1/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let mut bytes = response.bytes().await?.to_vec();
        let envelope: Envelope<T> = simd_json::serde::from_slice(&mut bytes)
            .map_err(|err| SourceError::Decode(err.to_string()))?;
        Ok(envelope.response)
    }
}

#[async_trait]
impl VehicleApi for HttpVehicleApi {
    async fn vehicle(&self, vin: &str) -> Result<Document, SourceError> {
        let vehicles: Vec<Document> = self.get_response("vehicles").await?;
        vehicles
            .into_iter()
            .find(|vehicle| vehicle.vin() == Some(vin))
            .ok_or_else(|| SourceError::VehicleNotFound(vin.to_string()))
    }

    async fn endpoint(&self, vehicle_id: i64, endpoint: &str) -> Result<Document, SourceError> {
        self.get_response(&format!("vehicles/{}/data_request/{}", vehicle_id, endpoint))
            .await
    }
}
