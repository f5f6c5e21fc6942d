//! Catalog lookup trait, HTTP client and in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ItemId;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::SagaError;

/// An item as listed in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    #[serde(default)]
    pub title: String,
    pub price: f64,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub damage: i32,
}

impl CatalogItem {
    pub fn new(id: impl Into<ItemId>, title: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            price,
            image_url: String::new(),
            damage: 0,
        }
    }
}

/// Items returned by a lookup, indexed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogItems {
    items: HashMap<ItemId, CatalogItem>,
}

impl CatalogItems {
    pub fn from_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<&CatalogItem> {
        self.items.get(id)
    }

    pub fn price_of(&self, id: &ItemId) -> Option<f64> {
        self.items.get(id).map(|i| i.price)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Fails with [`SagaError::ItemsNotFound`] naming every id in `ids`
    /// that is absent.
    pub fn require_all(&self, ids: &BTreeSet<ItemId>) -> Result<(), SagaError> {
        let missing: Vec<ItemId> = ids
            .iter()
            .filter(|id| !self.items.contains_key(*id))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SagaError::ItemsNotFound { missing })
        }
    }
}

/// Trait for looking up authoritative item prices.
///
/// A lookup is all-or-nothing: it succeeds only if every requested id
/// exists.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Returns the catalog entries for `ids`.
    ///
    /// Fails with [`SagaError::CatalogUnavailable`] if the catalog cannot be
    /// reached and [`SagaError::ItemsNotFound`] if any id is missing.
    async fn find_items_in_ids(&self, ids: &BTreeSet<ItemId>) -> Result<CatalogItems, SagaError>;
}

#[async_trait]
impl<T: CatalogLookup + ?Sized> CatalogLookup for Arc<T> {
    async fn find_items_in_ids(&self, ids: &BTreeSet<ItemId>) -> Result<CatalogItems, SagaError> {
        (**self).find_items_in_ids(ids).await
    }
}

#[derive(Serialize)]
struct FindItemsRequest<'a> {
    ids: Vec<&'a str>,
}

#[derive(Deserialize)]
struct FindItemsResponse {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

/// HTTP client for the catalog service.
///
/// Calls `POST {base_url}/items/find-in-ids` with `{"ids": [...]}` and
/// expects `{"items": [...]}` back.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
}

impl HttpCatalogClient {
    /// Creates a client whose requests are bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SagaError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::CatalogUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CatalogLookup for HttpCatalogClient {
    #[tracing::instrument(skip(self), fields(count = ids.len()))]
    async fn find_items_in_ids(&self, ids: &BTreeSet<ItemId>) -> Result<CatalogItems, SagaError> {
        let request = FindItemsRequest {
            ids: ids.iter().map(ItemId::as_str).collect(),
        };

        let response = self
            .client
            .post(format!("{}/items/find-in-ids", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| SagaError::CatalogUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SagaError::CatalogUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: FindItemsResponse = response
            .json()
            .await
            .map_err(|e| SagaError::CatalogUnavailable(format!("malformed response: {e}")))?;

        let items = CatalogItems::from_items(body.items);
        items.require_all(ids)?;
        tracing::debug!(found = items.len(), "catalog lookup succeeded");
        Ok(items)
    }
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    items: HashMap<ItemId, CatalogItem>,
    unavailable: bool,
    lookups: usize,
}

/// In-memory catalog for testing and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog listing `items`.
    pub fn with_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let state = InMemoryCatalogState {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn insert(&self, item: CatalogItem) {
        self.state.write().await.items.insert(item.id.clone(), item);
    }

    /// Makes every lookup fail with [`SagaError::CatalogUnavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Returns how many lookups reached the catalog.
    pub async fn lookup_count(&self) -> usize {
        self.state.read().await.lookups
    }
}

#[async_trait]
impl CatalogLookup for InMemoryCatalog {
    async fn find_items_in_ids(&self, ids: &BTreeSet<ItemId>) -> Result<CatalogItems, SagaError> {
        let mut state = self.state.write().await;
        state.lookups += 1;

        if state.unavailable {
            return Err(SagaError::CatalogUnavailable(
                "catalog service unavailable".to_string(),
            ));
        }

        let items = CatalogItems::from_items(
            ids.iter().filter_map(|id| state.items.get(id).cloned()),
        );
        items.require_all(ids)?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ids(values: &[&str]) -> BTreeSet<ItemId> {
        values.iter().map(|v| ItemId::new(*v)).collect()
    }

    fn seeded() -> InMemoryCatalog {
        InMemoryCatalog::with_items([
            CatalogItem::new("A", "Sword", 10.0),
            CatalogItem::new("B", "Shield", 5.0),
        ])
    }

    #[tokio::test]
    async fn test_lookup_returns_prices() {
        let catalog = seeded();

        let items = catalog.find_items_in_ids(&ids(&["A", "B"])).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items.price_of(&ItemId::new("A")), Some(10.0));
        assert_eq!(items.get(&ItemId::new("B")).unwrap().title, "Shield");
        assert_eq!(catalog.lookup_count().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_is_all_or_nothing() {
        let catalog = seeded();

        let err = catalog
            .find_items_in_ids(&ids(&["A", "C", "D"]))
            .await
            .unwrap_err();
        match err {
            SagaError::ItemsNotFound { missing } => {
                assert_eq!(missing, vec![ItemId::new("C"), ItemId::new("D")]);
            }
            other => panic!("expected ItemsNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unavailable_catalog() {
        let catalog = seeded();
        catalog.set_unavailable(true).await;

        let result = catalog.find_items_in_ids(&ids(&["A"])).await;
        assert!(matches!(result, Err(SagaError::CatalogUnavailable(_))));

        catalog.set_unavailable(false).await;
        assert!(catalog.find_items_in_ids(&ids(&["A"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_client_prices_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items/find-in-ids"))
            .and(body_json(serde_json::json!({"ids": ["A", "B"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "A", "title": "Sword", "price": 10.0, "image_url": "a.png", "damage": 7},
                    {"id": "B", "title": "Shield", "price": 5.0}
                ]
            })))
            .mount(&server)
            .await;

        let client = HttpCatalogClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let items = client.find_items_in_ids(&ids(&["A", "B"])).await.unwrap();

        assert_eq!(items.price_of(&ItemId::new("B")), Some(5.0));
        assert_eq!(items.get(&ItemId::new("A")).unwrap().damage, 7);
    }

    #[tokio::test]
    async fn test_http_client_reports_missing_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items/find-in-ids"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "A", "title": "Sword", "price": 10.0}]
            })))
            .mount(&server)
            .await;

        let client = HttpCatalogClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let err = client
            .find_items_in_ids(&ids(&["A", "C"]))
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::ItemsNotFound { missing } if missing == vec![ItemId::new("C")]));
    }

    #[tokio::test]
    async fn test_http_client_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpCatalogClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let result = client.find_items_in_ids(&ids(&["A"])).await;

        assert!(matches!(result, Err(SagaError::CatalogUnavailable(_))));
    }

    #[tokio::test]
    async fn test_http_client_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"items": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = HttpCatalogClient::new(&server.uri(), Duration::from_millis(50)).unwrap();
        let result = client.find_items_in_ids(&ids(&["A"])).await;

        assert!(matches!(result, Err(SagaError::CatalogUnavailable(_))));
    }
}
