use std::path::{Path, PathBuf};

use tracing::info;
use trip_tracker_lib::trip::TripRecord;

use crate::TrackerError;

/// Writes `<name>_log.json` into `dir`, creating the directory if needed.
pub async fn save_record(record: &TripRecord, dir: &Path) -> Result<PathBuf, TrackerError> {
    if !dir.exists() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let path = dir.join(record.export_file_name());
    tokio::fs::write(&path, record.to_json()?).await?;

    info!("Trip log written to {:?}", path);
    Ok(path)
}

pub async fn load_record(path: &Path) -> Result<TripRecord, TrackerError> {
    let json = tokio::fs::read_to_string(path).await?;
    Ok(TripRecord::from_json(&json)?)
}
