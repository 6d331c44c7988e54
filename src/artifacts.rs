//! Artifact management for screenshots and run results.
//!
//! Provides:
//! - Timestamped screenshot paths under the screenshot directory
//! - Pretty-printed run summaries under the results directory
//! - Listing of saved results

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::config::ArtifactSettings;
use crate::report::RunSummary;

/// Timestamp format used in artifact file names
const FILE_TIMESTAMP: &str = "%Y-%m-%dT%H-%M-%S";

/// Prefix of saved run result files
const RESULT_PREFIX: &str = "test-result-";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize run summary: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where screenshots and results are written
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    screenshot_dir: PathBuf,
    results_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(settings: &ArtifactSettings) -> Self {
        Self {
            screenshot_dir: settings.screenshot_dir.clone(),
            results_dir: settings.results_dir.clone(),
        }
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Path for a screenshot tagged `tag`, creating the directory
    pub fn screenshot_path(&self, tag: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.screenshot_dir)?;
        Ok(self
            .screenshot_dir
            .join(format!("{}-{}.png", sanitize_name(tag), file_timestamp(Utc::now()))))
    }

    /// Write `summary` as pretty JSON and return its path
    ///
    /// Results saved within the same second get a numeric suffix instead of
    /// overwriting each other.
    pub fn save_summary(&self, summary: &RunSummary) -> Result<PathBuf, ArtifactError> {
        fs::create_dir_all(&self.results_dir)?;

        let stem = format!("{}{}", RESULT_PREFIX, file_timestamp(summary.timestamp));
        let mut path = self.results_dir.join(format!("{}.json", stem));
        let mut n = 1;
        while path.exists() {
            path = self.results_dir.join(format!("{}-{}.json", stem, n));
            n += 1;
        }

        fs::write(&path, serde_json::to_string_pretty(summary)?)?;
        debug!(path = %path.display(), "saved run summary");
        Ok(path)
    }

    /// Saved result files, oldest first
    pub fn list_results(&self) -> io::Result<Vec<PathBuf>> {
        let mut results = Vec::new();
        if self.results_dir.exists() {
            for entry in fs::read_dir(&self.results_dir)? {
                let path = entry?.path();
                let is_result = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(RESULT_PREFIX) && n.ends_with(".json"))
                    .unwrap_or(false);
                if is_result {
                    results.push(path);
                }
            }
        }
        results.sort();
        Ok(results)
    }

    /// Read a saved summary back
    pub fn load_summary(&self, path: &Path) -> Result<RunSummary, ArtifactError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format(FILE_TIMESTAMP).to_string()
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() { "screenshot".to_string() } else { cleaned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ExecutionReport;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(&ArtifactSettings::under(dir.path()))
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("error-step-3"), "error-step-3");
        assert_eq!(sanitize_name("cart page/1"), "cart_page_1");
        assert_eq!(sanitize_name(""), "screenshot");
    }

    #[test]
    fn test_file_timestamp_format() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T13:04:09.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(file_timestamp(at), "2024-05-01T13-04-09");
    }

    #[test]
    fn test_screenshot_path_naming() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.screenshot_path("final-result").unwrap();

        assert!(store.screenshot_dir().is_dir());
        assert_eq!(path.parent(), Some(store.screenshot_dir()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("final-result-"));
        assert!(name.ends_with(".png"));
        // final-result-YYYY-MM-DDTHH-MM-SS.png
        assert_eq!(name.len(), "final-result-".len() + 19 + ".png".len());
    }

    #[test]
    fn test_save_and_list_results() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.list_results().unwrap().is_empty());

        let summary = RunSummary::executed("login", "m", "r", ExecutionReport::new(0, vec![]), 3);
        let first = store.save_summary(&summary).unwrap();
        let second = store.save_summary(&summary).unwrap();
        assert_ne!(first, second);

        fs::write(store.results_dir().join("notes.txt"), "x").unwrap();
        let listed = store.list_results().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].file_name().unwrap().to_str().unwrap().starts_with("test-result-"));

        assert_eq!(store.load_summary(&first).unwrap(), summary);
    }
}
