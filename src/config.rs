use crate::core::keys::validate_month_key;
use crate::core::types::DEFAULT_FORMAT_VERSION;

/// Day-state storage configuration
///
/// Month files live at `<log_data_root>/<YYYY-MM><file_suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayStateConfig {
    /// Folder holding the monthly state files
    pub log_data_root: String,

    /// File name suffix appended to the month key
    pub file_suffix: String,

    /// Written to `metadata.version` of every month file
    pub format_version: String,

    /// Write indented JSON
    pub pretty_json: bool,

    /// Flush write-barrier batches through the month-merge primitive.
    /// When disabled the cache falls back to per-day saves.
    pub merge_on_flush: bool,
}

impl Default for DayStateConfig {
    fn default() -> Self {
        Self::new("LOGS")
    }
}

impl DayStateConfig {
    /// Create a configuration rooted at `log_data_root`
    pub fn new(log_data_root: &str) -> Self {
        Self {
            log_data_root: log_data_root.trim_end_matches('/').to_string(),
            file_suffix: "-state.json".to_string(),
            format_version: DEFAULT_FORMAT_VERSION.to_string(),
            pretty_json: true,
            merge_on_flush: true,
        }
    }

    /// Set the month file suffix
    pub fn file_suffix(mut self, suffix: &str) -> Self {
        self.file_suffix = suffix.to_string();
        self
    }

    /// Set the format version
    pub fn format_version(mut self, version: &str) -> Self {
        self.format_version = version.to_string();
        self
    }

    /// Toggle indented JSON output
    pub fn pretty_json(mut self, pretty: bool) -> Self {
        self.pretty_json = pretty;
        self
    }

    /// Toggle month-merge flushing
    pub fn merge_on_flush(mut self, enabled: bool) -> Self {
        self.merge_on_flush = enabled;
        self
    }

    pub fn month_file_path(&self, month_key: &str) -> String {
        if self.log_data_root.is_empty() {
            format!("{}{}", month_key, self.file_suffix)
        } else {
            format!("{}/{}{}", self.log_data_root, month_key, self.file_suffix)
        }
    }

    /// Recovers the month key from a month file path, if the path names one.
    pub fn month_key_from_path(&self, path: &str) -> Option<String> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let month_key = file_name.strip_suffix(self.file_suffix.as_str())?;
        validate_month_key(month_key).ok()?;
        Some(month_key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_file_path() {
        let config = DayStateConfig::new("LOGS/");
        assert_eq!(config.month_file_path("2024-06"), "LOGS/2024-06-state.json");

        let flat = DayStateConfig::new("");
        assert_eq!(flat.month_file_path("2024-06"), "2024-06-state.json");
    }

    #[test]
    fn test_month_key_from_path() {
        let config = DayStateConfig::default();
        assert_eq!(
            config.month_key_from_path("LOGS/2024-06-state.json"),
            Some("2024-06".to_string())
        );
        assert_eq!(config.month_key_from_path("LOGS/2024-06-tasks.json"), None);
        assert_eq!(config.month_key_from_path("LOGS/notes-state.json"), None);
    }

    #[test]
    fn test_builder() {
        let config = DayStateConfig::new("data")
            .pretty_json(false)
            .merge_on_flush(false)
            .format_version("1.1");
        assert!(!config.pretty_json);
        assert!(!config.merge_on_flush);
        assert_eq!(config.format_version, "1.1");
    }
}
