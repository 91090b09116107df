//! Open Food Facts client

use super::{fetch_json, DatasetQuery, ProviderError, SourceProvider};
use async_trait::async_trait;
use nutri_common::RawFoodItem;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

pub const NAME: &str = "openfoodfacts";
pub const DISPLAY_NAME: &str = "Open Food Facts";

const MAX_PAGE_SIZE: usize = 100;
const COST_PER_100G: f64 = 1.5;
const DEFAULT_REGION: &str = "World";

const FIELDS: &str = "code,product_name,nutriments,categories,labels,countries";

/// OFF nutriment field -> standard nutrient name
const NUTRIENT_MAPPING: &[(&str, &str)] = &[
    ("proteins_100g", "protein_g"),
    ("fat_100g", "fat_g"),
    ("carbohydrates_100g", "carbs_g"),
    ("fiber_100g", "fiber_g"),
    ("energy-kcal_100g", "kcal"),
    ("calcium_100g", "calcium_mg"),
    ("iron_100g", "iron_mg"),
    ("magnesium_100g", "magnesium_mg"),
    ("zinc_100g", "zinc_mg"),
    ("potassium_100g", "potassium_mg"),
    ("selenium_100g", "selenium_ug"),
    ("iodine_100g", "iodine_ug"),
    ("vitamin-a_100g", "vitamin_a_ug"),
    ("vitamin-d_100g", "vitamin_d_iu"),
    ("vitamin-c_100g", "vitamin_c_mg"),
    ("folates_100g", "folate_ug"),
    ("vitamin-b12_100g", "b12_ug"),
    ("vitamin-b1_100g", "thiamin_mg"),
    ("vitamin-b2_100g", "riboflavin_mg"),
    ("vitamin-pp_100g", "niacin_mg"),
    ("vitamin-b6_100g", "b6_mg"),
];

const GLUTEN_FREE_LABELS: [&str; 3] = ["gluten-free", "sans gluten", "gluten free"];

const COMMON_SEARCHES: [&str; 7] = ["apple", "banana", "chicken", "bread", "milk", "cheese", "rice"];
const COMMON_PAGE_SIZE: usize = 5;

pub struct OpenFoodFactsClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenFoodFactsClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceProvider for OpenFoodFactsClient {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        DISPLAY_NAME
    }

    async fn search_by_query(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<RawFoodItem>, ProviderError> {
        let url = format!("{}/search", self.base_url);
        let params = [
            ("search_terms", query.to_string()),
            ("page_size", page_size.min(MAX_PAGE_SIZE).to_string()),
            ("json", "true".to_string()),
            ("fields", FIELDS.to_string()),
        ];

        let body = fetch_json(&self.http, &url, &params).await?;
        let products = body
            .get("products")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Payload("missing 'products' array".to_string()))?;

        let items: Vec<RawFoodItem> = products.iter().filter_map(parse_product).collect();
        debug!("Open Food Facts search '{}' returned {} products", query, items.len());
        Ok(items)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<RawFoodItem>, ProviderError> {
        let code = id.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ProviderError::InvalidId(id.to_string()));
        }

        let url = format!("{}/product/{}", self.base_url, code);
        let params = [("fields", FIELDS.to_string())];

        let body = match fetch_json(&self.http, &url, &params).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if body.get("status").and_then(Value::as_i64) != Some(1) {
            return Ok(None);
        }
        Ok(body.get("product").and_then(parse_product))
    }

    fn dataset_queries(&self) -> Vec<DatasetQuery> {
        COMMON_SEARCHES
            .iter()
            .map(|q| DatasetQuery::open(q, COMMON_PAGE_SIZE))
            .collect()
    }
}

/// Parse one product; `None` without a code or a name
pub fn parse_product(product: &Value) -> Option<RawFoodItem> {
    let code = product.get("code").and_then(Value::as_str)?.trim();
    let name = product.get("product_name").and_then(Value::as_str)?.trim();
    if code.is_empty() || name.is_empty() {
        return None;
    }

    let mut item = RawFoodItem {
        source_id: code.to_string(),
        name: name.to_string(),
        cost_per_100g: COST_PER_100G,
        ..Default::default()
    };

    if let Some(nutriments) = product.get("nutriments") {
        for (field, key) in NUTRIENT_MAPPING {
            // Only numeric values are trusted
            if let Some(amount) = nutriments.get(*field).and_then(Value::as_f64) {
                item.nutrients_per_100g.insert(key.to_string(), amount);
            }
        }
    }

    let categories = split_list(product.get("categories"));
    let labels = split_list(product.get("labels"));
    let countries = split_list(product.get("countries"));

    item.tags = infer_tags(&labels, &categories);
    item.category = categories.first().cloned();
    item.availability_regions = if countries.is_empty() {
        [DEFAULT_REGION.to_string()].into_iter().collect()
    } else {
        countries.into_iter().collect()
    };

    Some(item)
}

/// Comma-separated OFF field to trimmed, non-empty parts
fn split_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_str)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn infer_tags(labels: &[String], categories: &[String]) -> BTreeSet<String> {
    let labels: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    let categories: Vec<String> = categories.iter().map(|c| c.to_lowercase()).collect();

    let mut tags = BTreeSet::new();
    if labels.iter().any(|l| l.contains("organic") || l.contains("bio")) {
        tags.insert("ORGANIC".to_string());
    }
    if labels.iter().any(|l| l.contains("vegetarian")) {
        tags.insert("VEG".to_string());
    }
    if labels.iter().any(|l| l.contains("vegan")) {
        tags.insert("VEGAN".to_string());
    }
    if labels.iter().any(|l| GLUTEN_FREE_LABELS.contains(&l.as_str())) {
        tags.insert("GF".to_string());
    }
    if categories.iter().any(|c| c.contains("discount") || c.contains("value")) {
        tags.insert("LOW_COST".to_string());
    }
    tags
}
