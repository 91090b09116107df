//! Source provider clients
//!
//! A provider searches and fetches food items from one external nutrition
//! database. The cache and the update cycle only talk to `SourceProvider`;
//! tests plug in `FakeProvider` with pre-configured responses.

pub mod fake;
pub mod openfoodfacts;
pub mod usda;

use async_trait::async_trait;
use nutri_common::{ProviderConfig, RawFoodItem};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub use fake::FakeProvider;
pub use openfoodfacts::OpenFoodFactsClient;
pub use usda::UsdaClient;

/// Provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }
}

/// One query of a source's canonical dataset plan
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetQuery {
    /// Store only the best match under this key; `None` keeps every result
    /// under the food key of its name
    pub key: Option<String>,
    pub query: String,
    pub page_size: usize,
}

impl DatasetQuery {
    pub fn keyed(key: &str, query: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            query: query.to_string(),
            page_size: 5,
        }
    }

    pub fn open(query: &str, page_size: usize) -> Self {
        Self {
            key: None,
            query: query.to_string(),
            page_size,
        }
    }
}

/// External nutrition database client
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Registry key, e.g. "usda"
    fn name(&self) -> &str;

    /// Provenance stamped on records, e.g. "USDA FoodData Central"
    fn display_name(&self) -> &str;

    /// Search items by free-text query
    async fn search_by_query(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<RawFoodItem>, ProviderError>;

    /// Fetch one item; `Ok(None)` when the provider does not know the id
    async fn get_by_id(&self, id: &str) -> Result<Option<RawFoodItem>, ProviderError>;

    /// Queries that together make up this source's full dataset
    fn dataset_queries(&self) -> Vec<DatasetQuery>;

    /// Release client resources
    async fn close(&self) {}
}

/// HTTP client shared by the real providers
pub fn build_http_client(config: &ProviderConfig) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// GET a JSON document
pub(crate) async fn fetch_json(
    http: &reqwest::Client,
    url: &str,
    params: &[(&str, String)],
) -> Result<Value, ProviderError> {
    let response = http
        .get(url)
        .query(params)
        .send()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::Payload(e.to_string()))
}

/// Providers enabled by the configuration, in registration order
pub fn providers_from_config(
    config: &ProviderConfig,
) -> Result<Vec<Arc<dyn SourceProvider>>, ProviderError> {
    let http = build_http_client(config)?;

    let mut providers: Vec<Arc<dyn SourceProvider>> = vec![Arc::new(UsdaClient::new(
        http.clone(),
        &config.usda_base_url,
        &config.usda_api_key,
    ))];

    if config.openfoodfacts_enabled {
        providers.push(Arc::new(OpenFoodFactsClient::new(
            http,
            &config.openfoodfacts_base_url,
        )));
    }

    info!(
        "Configured providers: {}",
        providers
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(providers)
}
