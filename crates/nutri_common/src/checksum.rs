//! Dataset checksums
//!
//! SHA-256 over a key-sorted JSON rendering of a record set, so two sets with
//! the same records hash identically regardless of insertion order.

use crate::record::NormalizedFoodRecord;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Checksum of a record set (lowercase hex)
pub fn checksum<'a, I>(records: I) -> Result<String, serde_json::Error>
where
    I: IntoIterator<Item = (&'a String, &'a NormalizedFoodRecord)>,
{
    let canonical: BTreeMap<&str, &NormalizedFoodRecord> = records
        .into_iter()
        .map(|(key, record)| (key.as_str(), record))
        .collect();

    let json = serde_json::to_string(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(name: &str, protein: f64) -> NormalizedFoodRecord {
        NormalizedFoodRecord {
            name: name.to_string(),
            nutrients_per_100g: [("protein_g".to_string(), protein)].into_iter().collect(),
            cost_per_100g: 1.0,
            tags: ["GF".to_string(), "VEG".to_string()].into_iter().collect(),
            availability_regions: Default::default(),
            source: "test".to_string(),
            source_id: name.to_string(),
            category: None,
        }
    }

    #[test]
    fn test_checksum_ignores_insertion_order() {
        let names = ["oats", "banana", "tofu", "lentils"];

        let mut forward = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            forward.insert(name.to_string(), record(name, i as f64));
        }
        let mut backward = HashMap::new();
        for (i, name) in names.iter().enumerate().rev() {
            backward.insert(name.to_string(), record(name, i as f64));
        }

        assert_eq!(checksum(&forward).unwrap(), checksum(&backward).unwrap());
    }

    #[test]
    fn test_checksum_detects_changes() {
        let mut a = BTreeMap::new();
        a.insert("oats".to_string(), record("oats", 13.0));
        let mut b = a.clone();
        b.insert("oats".to_string(), record("oats", 13.5));

        let sum = checksum(&a).unwrap();
        assert_eq!(sum.len(), 64);
        assert_ne!(sum, checksum(&b).unwrap());
    }

    #[test]
    fn test_empty_set_has_stable_checksum() {
        let empty: BTreeMap<String, NormalizedFoodRecord> = BTreeMap::new();
        assert_eq!(checksum(&empty).unwrap(), checksum(&empty).unwrap());
    }
}
