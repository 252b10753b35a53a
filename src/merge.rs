use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::state::Part;

/// Concatenates the staged parts into `destination` in index order, deleting
/// each temp file once it has been appended. Any failure aborts the merge and
/// leaves the remaining temp files in place.
pub async fn merge_parts(parts: &[Part], destination: &Path) -> Result<u64, DownloadError> {
    let merge_err = |source| DownloadError::Merge { path: destination.to_path_buf(), source };

    let mut file = File::create(destination).await.map_err(merge_err)?;
    let mut written = 0u64;

    for part in parts {
        let data = fs::read(&part.temp_path).await.map_err(|source| DownloadError::Merge {
            path: part.temp_path.clone(),
            source,
        })?;
        file.write_all(&data).await.map_err(merge_err)?;
        written += data.len() as u64;

        fs::remove_file(&part.temp_path).await.map_err(|source| DownloadError::Merge {
            path: part.temp_path.clone(),
            source,
        })?;
        debug!("Merged part {}/{}", part.id, parts.len());
    }

    file.flush().await.map_err(merge_err)?;
    Ok(written)
}

/// Deletes the temp files of finished parts. Keeps going after a failed
/// deletion and returns the last error seen.
pub async fn remove_finished(parts: &[Part]) -> Result<usize, DownloadError> {
    let mut removed = 0;
    let mut last_error = None;

    for part in parts.iter().filter(|p| p.finished) {
        match fs::remove_file(&part.temp_path).await {
            Ok(()) => removed += 1,
            Err(source) => {
                warn!("Failed to remove {}: {}", part.temp_path.display(), source);
                last_error = Some(DownloadError::Cleanup { path: part.temp_path.clone(), source });
            }
        }
    }

    match last_error {
        Some(err) => Err(err),
        None => Ok(removed),
    }
}
