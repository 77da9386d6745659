//! Count command implementation.
//!
//! Counting runs below the typed façade, so filters may only name the base
//! record fields every table shares (`owner`, `enabled`, `created.timestamp`
//! and so on).

use serde_json::Value;
use std::sync::Arc;
use unibase::{Config, Filter, Schema};

/// Counts records of `table` matching every filter in `filters`.
pub fn run(config: &Config, table: &str, filters: &[String]) -> Result<u64, Box<dyn std::error::Error>> {
    let parsed = filters
        .iter()
        .map(|text| {
            let tree: Value = serde_json::from_str(text)?;
            Ok(Filter::parse(&tree)?)
        })
        .collect::<Result<Vec<_>, Box<dyn std::error::Error>>>()?;

    let backend = unibase::open_backend(config)?;
    let mut plan = backend.find(table, Arc::new(Schema::builder().build()))?;
    for filter in &parsed {
        plan.filter(filter)?;
    }
    Ok(plan.count()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_filters_fail_before_opening() {
        let config = Config::new().database_string("bogus://nowhere");
        assert!(run(&config, "Counter", &["[\"enabled\"".to_string()]).is_err());
        assert!(run(&config, "Counter", &["[\"enabled\", \"~\", 1]".to_string()]).is_err());
    }

    #[test]
    fn empty_collection_counts_zero() {
        let config = Config::new().database_string("memory://");
        assert_eq!(run(&config, "Counter", &[]).unwrap(), 0);
        let only_enabled = vec!["[\"enabled\", \"==\", true]".to_string()];
        assert_eq!(run(&config, "Counter", &only_enabled).unwrap(), 0);
    }
}
