//! Info command implementation.

use serde::Serialize;
use unibase::{Config, Database};

/// Backend health and the settings it was opened with.
#[derive(Debug, Serialize)]
pub struct InfoResult {
    /// Application name.
    pub app_name: String,
    /// Connection string.
    pub database: String,
    /// `document` or `relational`.
    pub backend: String,
    /// Whether the backend answered a ping.
    pub ok: bool,
    /// Export archive directory.
    pub export_directory: String,
    /// Whether count results are cached.
    pub cache_enabled: bool,
    /// Per-collection cache bound.
    pub cache_size: usize,
}

impl InfoResult {
    fn of(db: &Database) -> Self {
        let config = db.config();
        Self {
            app_name: config.app_name.clone(),
            database: config.database_string.clone(),
            backend: db.kind().to_string(),
            ok: db.ok(),
            export_directory: config.database_export_directory.display().to_string(),
            cache_enabled: config.cache_enabled,
            cache_size: config.cache_size,
        }
    }
}

/// Runs the info command.
pub fn run(config: Config, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = unibase::open(config)?;
    let result = InfoResult::of(&db);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    if result.ok {
        Ok(())
    } else {
        Err(format!("backend at {} is not responding", result.database).into())
    }
}

fn print_text_output(result: &InfoResult) {
    println!("unibase {}", result.app_name);
    println!("==============");
    println!();
    println!("Database:  {}", result.database);
    println!("Backend:   {}", result.backend);
    println!("Health:    {}", if result.ok { "ok" } else { "unreachable" });
    println!("Exports:   {}", result.export_directory);
    if result.cache_enabled {
        println!("Cache:     {} entries per collection", result.cache_size);
    } else {
        println!("Cache:     disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_of_memory_database() {
        let db = unibase::open(Config::new().app_name("demo").database_string("memory://")).unwrap();
        let info = InfoResult::of(&db);
        assert!(info.ok);
        assert_eq!(info.app_name, "demo");
        assert_eq!(info.backend, db.kind().to_string());

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["database"], "memory://");
    }
}
