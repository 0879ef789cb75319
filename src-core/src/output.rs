//! Output file naming.

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Length of the random suffix that keeps names from colliding within a second.
const SUFFIX_LEN: usize = 5;

/// Short random alphanumeric suffix.
pub fn random_suffix() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect()
}

/// Build `<dir>/<prefix>_<YYYY-MM-DD_HHMMSS>_<suffix>.<ext>`, creating `dir`
/// if needed.
pub fn generate_output_path(dir: &Path, prefix: &str, ext: &str) -> Result<PathBuf, std::io::Error> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let timestamp = Local::now().format("%Y-%m-%d_%H%M%S");
    let filename = format!("{}_{}_{}.{}", prefix, timestamp, random_suffix(), ext);
    let path = dir.join(filename);

    debug!("Output path: {:?}", path);
    Ok(path)
}
