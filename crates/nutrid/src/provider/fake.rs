//! Fake provider for deterministic testing
//!
//! Serves pre-configured search results and items without network access.
//! Responses can be swapped between calls, so one instance can drive a whole
//! sequence of update cycles.
//!
//! ```rust,ignore
//! let fake = FakeProvider::new("usda", "USDA FoodData Central");
//! fake.set_dataset(vec![FakeProvider::item("1", "Oats", 13.0, 7.0, 66.0)]);
//! let records = store.fetch_dataset("usda").await?;
//! ```

use super::{DatasetQuery, ProviderError, SourceProvider};
use async_trait::async_trait;
use nutri_common::RawFoodItem;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Query used by `set_dataset`
pub const DATASET_QUERY: &str = "fake dataset";

#[derive(Default)]
struct FakeState {
    search_results: HashMap<String, Vec<RawFoodItem>>,
    failing_queries: HashSet<String>,
    items: HashMap<String, RawFoodItem>,
    dataset_queries: Vec<DatasetQuery>,
    offline: bool,
    search_delay: Duration,
    panic_next_search: bool,
    call_counts: HashMap<String, usize>,
    closed: bool,
}

pub struct FakeProvider {
    name: String,
    display_name: String,
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Item with the three macro nutrients set
    pub fn item(id: &str, name: &str, protein: f64, fat: f64, carbs: f64) -> RawFoodItem {
        let mut item = RawFoodItem {
            source_id: id.to_string(),
            name: name.to_string(),
            cost_per_100g: 1.0,
            ..Default::default()
        };
        item.nutrients_per_100g.insert("protein_g".to_string(), protein);
        item.nutrients_per_100g.insert("fat_g".to_string(), fat);
        item.nutrients_per_100g.insert("carbs_g".to_string(), carbs);
        item
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Results returned for `query`
    pub fn set_search_results(&self, query: &str, items: Vec<RawFoodItem>) {
        self.state()
            .search_results
            .insert(query.to_string(), items);
    }

    /// Make `query` fail with a network error
    pub fn fail_query(&self, query: &str) {
        self.state().failing_queries.insert(query.to_string());
    }

    /// Make every call fail with a network error
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Hold every search for `delay` before answering
    pub fn set_search_delay(&self, delay: Duration) {
        self.state().search_delay = delay;
    }

    /// Make the next search panic, as a crashing client would
    pub fn panic_on_next_search(&self) {
        self.state().panic_next_search = true;
    }

    /// Item served by `get_by_id`
    pub fn insert_item(&self, item: RawFoodItem) {
        self.state().items.insert(item.source_id.clone(), item);
    }

    pub fn set_dataset_queries(&self, queries: Vec<DatasetQuery>) {
        self.state().dataset_queries = queries;
    }

    /// Serve `items` as the complete dataset through one open query
    pub fn set_dataset(&self, items: Vec<RawFoodItem>) {
        let mut state = self.state();
        state.dataset_queries = vec![DatasetQuery::open(DATASET_QUERY, items.len().max(1))];
        state.search_results.insert(DATASET_QUERY.to_string(), items);
    }

    /// Calls made for `query`
    pub fn call_count(&self, query: &str) -> usize {
        self.state().call_counts.get(query).copied().unwrap_or(0)
    }

    /// Calls made across all queries and ids
    pub fn total_calls(&self) -> usize {
        self.state().call_counts.values().sum()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn record_call(&self, key: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        *state.call_counts.entry(key.to_string()).or_insert(0) += 1;
        if state.offline || state.failing_queries.contains(key) {
            return Err(ProviderError::Network(format!(
                "{} unreachable for '{}'",
                self.name, key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn search_by_query(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<RawFoodItem>, ProviderError> {
        let delay = {
            let mut state = self.state();
            if std::mem::take(&mut state.panic_next_search) {
                drop(state);
                panic!("{} client crashed on '{}'", self.name, query);
            }
            state.search_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.record_call(query)?;
        Ok(self
            .state()
            .search_results
            .get(query)
            .map(|items| items.iter().take(page_size).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<RawFoodItem>, ProviderError> {
        if id.trim().is_empty() || id.contains(char::is_whitespace) {
            return Err(ProviderError::InvalidId(id.to_string()));
        }
        self.record_call(id)?;
        Ok(self.state().items.get(id).cloned())
    }

    fn dataset_queries(&self) -> Vec<DatasetQuery> {
        self.state().dataset_queries.clone()
    }

    async fn close(&self) {
        self.state().closed = true;
    }
}
