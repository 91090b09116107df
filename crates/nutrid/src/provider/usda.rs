//! USDA FoodData Central client
//!
//! Searches Foundation and SR Legacy foods and maps FDC nutrient ids to
//! standard nutrient names.

use super::{fetch_json, DatasetQuery, ProviderError, SourceProvider};
use async_trait::async_trait;
use nutri_common::RawFoodItem;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub const NAME: &str = "usda";
pub const DISPLAY_NAME: &str = "USDA FoodData Central";

/// Search results are capped by the API
const MAX_PAGE_SIZE: usize = 200;

/// Items with fewer mapped nutrients are dropped
const MIN_NUTRIENTS: usize = 3;

const COST_PER_100G: f64 = 1.0;
const REGIONS: [&str; 3] = ["US", "BY", "RU"];

/// FDC nutrient id -> standard nutrient name
const NUTRIENT_MAPPING: &[(u64, &str)] = &[
    (1003, "protein_g"),
    (1004, "fat_g"),
    (1005, "carbs_g"),
    (1079, "fiber_g"),
    (1008, "kcal"),
    (1087, "calcium_mg"),
    (1089, "iron_mg"),
    (1090, "magnesium_mg"),
    (1095, "zinc_mg"),
    (1092, "potassium_mg"),
    (1140, "selenium_ug"),
    (1100, "iodine_ug"),
    (1106, "vitamin_a_ug"),
    (1114, "vitamin_d_iu"),
    (1162, "vitamin_c_mg"),
    (1175, "folate_ug"),
    (1178, "b12_ug"),
    (1165, "thiamin_mg"),
    (1166, "riboflavin_mg"),
    (1167, "niacin_mg"),
    (1179, "b6_mg"),
];

const ANIMAL_KEYWORDS: [&str; 8] = [
    "chicken", "beef", "pork", "fish", "salmon", "tuna", "meat", "egg",
];
const DAIRY_KEYWORDS: [&str; 5] = ["milk", "cheese", "yogurt", "butter", "cream"];
const GLUTEN_KEYWORDS: [&str; 5] = ["wheat", "bread", "pasta", "cereal", "flour"];

/// Common foods: (key, search query)
const COMMON_SEARCHES: [(&str, &str); 20] = [
    ("chicken_breast", "chicken breast skinless"),
    ("salmon", "salmon atlantic"),
    ("eggs", "egg whole raw"),
    ("greek_yogurt", "yogurt greek plain"),
    ("milk", "milk whole"),
    ("cottage_cheese", "cottage cheese"),
    ("oats", "oats rolled"),
    ("brown_rice", "rice brown cooked"),
    ("quinoa", "quinoa cooked"),
    ("whole_wheat_bread", "bread whole wheat"),
    ("sweet_potato", "sweet potato baked"),
    ("lentils", "lentils cooked"),
    ("chickpeas", "chickpeas cooked"),
    ("black_beans", "black beans cooked"),
    ("almonds", "almonds raw"),
    ("spinach", "spinach raw"),
    ("broccoli", "broccoli raw"),
    ("bananas", "bananas raw"),
    ("apples", "apples raw"),
    ("tomatoes", "tomatoes raw"),
];

pub struct UsdaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl UsdaClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl SourceProvider for UsdaClient {
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
        let url = format!("{}/foods/search", self.base_url);
        let params = [
            ("query", query.to_string()),
            ("pageSize", page_size.min(MAX_PAGE_SIZE).to_string()),
            ("api_key", self.api_key.clone()),
            ("dataType", "Foundation".to_string()),
            ("dataType", "SR Legacy".to_string()),
            ("sortBy", "dataType.keyword".to_string()),
            ("sortOrder", "asc".to_string()),
        ];

        let body = fetch_json(&self.http, &url, &params).await?;
        let items = parse_search_response(&body)?;
        debug!("USDA search '{}' returned {} usable items", query, items.len());
        Ok(items)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<RawFoodItem>, ProviderError> {
        let fdc_id: u64 = id
            .trim()
            .parse()
            .map_err(|_| ProviderError::InvalidId(id.to_string()))?;

        let url = format!("{}/food/{}", self.base_url, fdc_id);
        let params = [("api_key", self.api_key.clone())];

        match fetch_json(&self.http, &url, &params).await {
            Ok(body) => Ok(parse_food(&body)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn dataset_queries(&self) -> Vec<DatasetQuery> {
        COMMON_SEARCHES
            .iter()
            .map(|(key, query)| DatasetQuery::keyed(key, query))
            .collect()
    }
}

/// Parse a `/foods/search` body into usable items
pub fn parse_search_response(body: &Value) -> Result<Vec<RawFoodItem>, ProviderError> {
    let foods = body
        .get("foods")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Payload("missing 'foods' array".to_string()))?;

    Ok(foods.iter().filter_map(parse_food).collect())
}

/// Parse one FDC food; `None` when it lacks an id or enough nutrients
pub fn parse_food(food: &Value) -> Option<RawFoodItem> {
    let source_id = match food.get("fdcId") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return None,
    };
    let name = food
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut item = RawFoodItem {
        source_id,
        category: parse_category(food),
        cost_per_100g: COST_PER_100G,
        availability_regions: REGIONS.iter().map(|r| r.to_string()).collect(),
        tags: infer_tags(&name),
        name,
        ..Default::default()
    };

    if let Some(nutrients) = food.get("foodNutrients").and_then(Value::as_array) {
        for entry in nutrients {
            let Some((id, amount)) = nutrient_entry(entry) else {
                continue;
            };
            if let Some((_, key)) = NUTRIENT_MAPPING.iter().find(|(nid, _)| *nid == id) {
                item.nutrients_per_100g.insert(key.to_string(), amount);
            }
        }
    }

    if item.nutrients_per_100g.len() < MIN_NUTRIENTS {
        warn!(
            "Dropping USDA food {} ({}): only {} nutrients",
            item.source_id,
            item.name,
            item.nutrients_per_100g.len()
        );
        return None;
    }

    Some(item)
}

/// Search results carry `nutrientId`/`value`; detail lookups carry
/// `nutrient.id`/`amount`
fn nutrient_entry(entry: &Value) -> Option<(u64, f64)> {
    if let (Some(id), Some(value)) = (
        entry.get("nutrientId").and_then(Value::as_u64),
        entry.get("value").and_then(Value::as_f64),
    ) {
        return Some((id, value));
    }

    let id = entry.get("nutrient")?.get("id")?.as_u64()?;
    let amount = entry.get("amount")?.as_f64()?;
    Some((id, amount))
}

fn parse_category(food: &Value) -> Option<String> {
    match food.get("foodCategory")? {
        Value::Object(obj) => obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn infer_tags(name: &str) -> BTreeSet<String> {
    let lower = name.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let mut tags = BTreeSet::new();
    if !has_any(&ANIMAL_KEYWORDS[..]) {
        tags.insert("VEG".to_string());
        if !has_any(&DAIRY_KEYWORDS[..]) {
            tags.insert("VEGAN".to_string());
        }
    }
    if !has_any(&GLUTEN_KEYWORDS[..]) {
        tags.insert("GF".to_string());
    }
    tags
}
