use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, trace};

/// Reads a `.json` file from `path`.
///
/// ```rust,ignore
/// let output: DesiredType = mag7_util::read_json("mag7_final_model.json").await?;
/// ```
pub async fn read_json<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    trace!("reading file at path: \"{}\"", path.display());
    let file = tokio::fs::read(path).await.map_err(|e| {
        error!("failed to read file at \"{}\": {e}", path.display());
        e
    })?;
    let data: T = serde_json::from_slice(&file)?;
    Ok(data)
}

/// Write `rows` to a `.csv` file at `path`, one record per row, with a header
/// line taken from the field names of `T`.
///
/// Parent directories are created as necessary.
pub fn write_csv<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let mut wtr = csv::Writer::from_path(path).map_err(|e| {
        error!("failed to create csv writer at \"{}\": {e}", path.display());
        e
    })?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;

    debug!("{} rows written to {}", rows.len(), path.display());
    Ok(())
}
