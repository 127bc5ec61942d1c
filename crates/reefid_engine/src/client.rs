use std::time::Duration;

use reefid_core::{SpeciesData, TaskId};
use reefid_logging::{reef_debug, reef_trace};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::{BatchItemResponse, BatchResponse, FailureKind, IdentifyError, ImagePayload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub base_url: String,
    pub device_id: String,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/".to_string(),
            device_id: "reefid-device".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Remote species identification service.
#[async_trait::async_trait]
pub trait IdentificationService: Send + Sync {
    async fn identify(
        &self,
        payload: &ImagePayload,
        task_id: TaskId,
    ) -> Result<SpeciesData, IdentifyError>;

    async fn batch_identify(
        &self,
        payloads: &[ImagePayload],
    ) -> Result<BatchResponse, IdentifyError>;

    /// Asks the service to abandon work for `task_id`. Best effort; never blocks the caller.
    fn cancel(&self, task_id: TaskId);
}

#[derive(Debug, Clone)]
pub struct ReqwestIdentifier {
    settings: ClientSettings,
    client: reqwest::Client,
}

impl ReqwestIdentifier {
    pub fn new(settings: ClientSettings) -> Result<Self, IdentifyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| IdentifyError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url, IdentifyError> {
        let mut base = self.settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        reqwest::Url::parse(&base)
            .and_then(|url| url.join(path))
            .map_err(|err| IdentifyError::new(FailureKind::InvalidUrl, err.to_string()))
    }

    /// POSTs a JSON body and returns the raw 2xx body.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Vec<u8>, IdentifyError> {
        let url = self.endpoint(path)?;
        let body = serde_json::to_vec(body)
            .map_err(|err| IdentifyError::new(FailureKind::Other, err.to_string()))?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        reef_trace!("POST {} -> {} ({} bytes)", path, status, bytes.len());

        if !status.is_success() {
            let message = error_message(&bytes).unwrap_or_else(|| status.to_string());
            return Err(IdentifyError::new(
                FailureKind::HttpStatus(status.as_u16()),
                message,
            ));
        }
        if bytes.is_empty() {
            return Err(IdentifyError::new(
                FailureKind::EmptyResponse,
                "service returned no data",
            ));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait::async_trait]
impl IdentificationService for ReqwestIdentifier {
    async fn identify(
        &self,
        payload: &ImagePayload,
        task_id: TaskId,
    ) -> Result<SpeciesData, IdentifyError> {
        let request = IdentifyRequest {
            device_id: &self.settings.device_id,
            image: payload.as_str(),
            task_id: task_id.to_string(),
        };
        let body = self.post_json("identify", &request).await?;
        let response: IdentifyResponse = decode(&body)?;
        match response.species {
            Some(species) => Ok(species.into()),
            None => Err(IdentifyError::new(
                FailureKind::NoMatch,
                response
                    .error
                    .unwrap_or_else(|| "no matching species".to_string()),
            )),
        }
    }

    async fn batch_identify(
        &self,
        payloads: &[ImagePayload],
    ) -> Result<BatchResponse, IdentifyError> {
        let request = BatchRequest {
            device_id: &self.settings.device_id,
            images: payloads.iter().map(ImagePayload::as_str).collect(),
        };
        let body = self.post_json("identify/batch", &request).await?;
        let response: WireBatchResponse = decode(&body)?;
        let results = response
            .results
            .into_iter()
            .map(|item| BatchItemResponse {
                index: item.index,
                result: match item.species {
                    Some(species) => Ok(species.into()),
                    None => Err(IdentifyError::new(
                        FailureKind::NoMatch,
                        item.error.unwrap_or_else(|| "no matching species".to_string()),
                    )),
                },
            })
            .collect();
        Ok(BatchResponse { results })
    }

    fn cancel(&self, task_id: TaskId) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            reef_debug!("No runtime available; cancel for {} not sent", task_id);
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            let request = CancelRequest {
                device_id: &this.settings.device_id,
                task_id: task_id.to_string(),
            };
            if let Err(err) = this.post_json("cancel", &request).await {
                reef_debug!("Cancel for {} not acknowledged: {}", task_id, err);
            }
        });
    }
}

#[derive(Serialize)]
struct IdentifyRequest<'a> {
    device_id: &'a str,
    image: &'a str,
    task_id: String,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    device_id: &'a str,
    images: Vec<&'a str>,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    device_id: &'a str,
    task_id: String,
}

#[derive(Deserialize)]
struct IdentifyResponse {
    species: Option<WireSpecies>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireBatchResponse {
    results: Vec<WireBatchItem>,
}

#[derive(Deserialize)]
struct WireBatchItem {
    index: usize,
    species: Option<WireSpecies>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireSpecies {
    common_name: String,
    scientific_name: Option<String>,
    confidence: Option<f32>,
    description: Option<String>,
    habitat: Option<String>,
}

impl From<WireSpecies> for SpeciesData {
    fn from(wire: WireSpecies) -> Self {
        SpeciesData {
            common_name: wire.common_name,
            scientific_name: wire.scientific_name,
            confidence: wire.confidence,
            description: wire.description,
            habitat: wire.habitat,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

fn decode<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, IdentifyError> {
    serde_json::from_slice(body).map_err(|err| IdentifyError::new(FailureKind::Decode, err.to_string()))
}

fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|body| body.error)
}

fn map_reqwest_error(err: reqwest::Error) -> IdentifyError {
    if err.is_timeout() {
        return IdentifyError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return IdentifyError::new(FailureKind::InvalidUrl, err.to_string());
    }
    if err.is_decode() {
        return IdentifyError::new(FailureKind::Decode, err.to_string());
    }
    IdentifyError::new(FailureKind::Network, err.to_string())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
