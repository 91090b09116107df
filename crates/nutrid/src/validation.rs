//! Dataset validation
//!
//! Every violation of every record is collected, so one failed update shows
//! operators the complete list.

use nutri_common::{RecordSet, REQUIRED_NUTRIENTS};

/// Per-100g gram amounts above this are physically impossible
const MAX_GRAMS_PER_100G: f64 = 100.0;

/// Validation errors for `records`; empty when the set is valid
pub fn validate_food_data(records: &RecordSet) -> Vec<String> {
    let mut errors = Vec::new();

    for (key, food) in records {
        if food.name.trim().is_empty() || food.source.trim().is_empty() {
            errors.push(format!("Food {} missing required fields", key));
            continue;
        }

        let missing: Vec<&str> = REQUIRED_NUTRIENTS
            .iter()
            .copied()
            .filter(|n| !food.nutrients_per_100g.contains_key(*n))
            .collect();
        if !missing.is_empty() {
            errors.push(format!("Food {} missing nutrients: {:?}", key, missing));
        }

        for (nutrient, value) in &food.nutrients_per_100g {
            if !value.is_finite() {
                errors.push(format!("Food {} has invalid {}: {}", key, nutrient, value));
            } else if *value < 0.0 {
                errors.push(format!("Food {} has negative {}: {}", key, nutrient, value));
            } else if nutrient.ends_with("_g") && *value > MAX_GRAMS_PER_100G {
                errors.push(format!(
                    "Food {} has unrealistic {}: {}g per 100g",
                    key, nutrient, value
                ));
            }
        }
    }

    errors
}
