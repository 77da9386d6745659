//! Export and import commands.

use std::path::Path;
use tracing::info;
use unibase::Config;

/// Writes an export archive and prints its path.
pub fn export(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = unibase::open(config)?;
    let archive = db.export_database()?;
    info!(archive = %archive.display(), "export finished");
    println!("{}", archive.display());
    Ok(())
}

/// Loads `archive`, replacing existing contents when `drop` is set.
pub fn import(config: Config, archive: &Path, drop: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !archive.is_file() {
        return Err(format!("No archive found at {}", archive.display()).into());
    }
    let db = unibase::open(config)?;
    db.import_database(archive, drop)?;
    println!(
        "Imported {} ({})",
        archive.display(),
        if drop { "replaced" } else { "merged" }
    );
    Ok(())
}
