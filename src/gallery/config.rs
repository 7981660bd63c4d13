use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::gallery::archive::TargetKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration, loaded from a TOML file.
///
/// Every field carries a default so a partial (or empty) config degrades the
/// dependent feature instead of failing the run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub scanning: ScanningConfig,
    pub lookup: LookupConfig,
    pub archive: ArchiveTypesConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Ok(toml::from_str(&source)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log file appended to alongside terminal output. Absent disables the
    /// file logger.
    pub log_file_name: Option<String>,
    /// 7-Zip executable candidates, tried in order.
    pub seven_zip_commands: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_file_name: None,
            seven_zip_commands: vec!["7z".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    pub archive_file_extensions: Vec<String>,
    pub image_file_extensions: Vec<String>,
    /// Files in these extensions are allowed inside an image folder without
    /// disqualifying it as a folder target.
    pub archive_folder_permitted_extensions: Vec<String>,
    pub ignore_files: Vec<String>,
    pub ignore_directories: Vec<String>,
    pub scan_folders_for_archives: bool,
    pub scan_folders_for_images: bool,
    /// Maximum directory depth for the breadth-first scan; 1 scans only the
    /// directories named on the command line.
    pub scan_folders_recursive_depth: u32,
    /// Keep descending into subdirectories of a directory that already
    /// qualified as a folder target.
    pub archive_folder_permit_nested_directories: bool,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            archive_file_extensions: vec![
                ".zip".to_string(),
                ".cbz".to_string(),
                ".rar".to_string(),
                ".cbr".to_string(),
                ".7z".to_string(),
            ],
            image_file_extensions: vec![
                ".jpg".to_string(),
                ".jpeg".to_string(),
                ".png".to_string(),
                ".gif".to_string(),
                ".webp".to_string(),
            ],
            archive_folder_permitted_extensions: Vec::new(),
            ignore_files: Vec::new(),
            ignore_directories: Vec::new(),
            scan_folders_for_archives: false,
            scan_folders_for_images: false,
            scan_folders_recursive_depth: 1,
            archive_folder_permit_nested_directories: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// File holding the exhentai cookie string; resolved relative to the
    /// config file. Presence of a non-empty cookie string switches the run
    /// to exhentai.
    pub ex_cookies_file_name: Option<String>,
    pub search_expunged: bool,
    pub search_covers_only: bool,
    /// Cap on how many search results are carried into the metadata fetch.
    pub maximum_results_to_check: usize,
    pub delay: DelayConfig,
    pub priorities: PrioritiesConfig,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            ex_cookies_file_name: None,
            search_expunged: false,
            search_covers_only: false,
            maximum_results_to_check: 1,
            delay: DelayConfig::default(),
            priorities: PrioritiesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Seconds between gallery hash-search calls.
    pub gallery_search: f64,
    /// Seconds between metadata API calls.
    pub api_call: f64,
    /// Exit without waiting for outstanding delay gates.
    pub skip_on_completion: bool,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            gallery_search: 1.0,
            api_call: 5.0,
            skip_on_completion: false,
        }
    }
}

/// One weighted scoring rule.
///
/// A rule without a `value` is a default: it applies only when no valued
/// rule in the same set matched.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriorityRule {
    pub value: Option<String>,
    pub priority: f64,
    pub blacklist: bool,
}

impl Default for PriorityRule {
    fn default() -> Self {
        Self {
            value: None,
            priority: 0.0,
            blacklist: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrioritiesConfig {
    /// Tag rules; values may be namespace-qualified (`language:english`).
    pub tags: Vec<PriorityRule>,
    pub language: Vec<PriorityRule>,
    pub title: Vec<PriorityRule>,
    pub title_original: Vec<PriorityRule>,
    pub file_count: FileCountPriorities,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileCountPriorities {
    /// Bonus for candidates whose file count is nearest the local image
    /// count (skipped for partial targets).
    pub nearest: Option<PriorityRule>,
    /// Bonus for candidates with the highest file count.
    pub highest: Option<PriorityRule>,
    /// Bonus for candidates with the most search matches.
    pub highest_search_matches: Option<PriorityRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArchiveTypesConfig {
    pub file: Option<ArchiveTypeConfig>,
    pub folder: Option<ArchiveTypeConfig>,
}

impl ArchiveTypesConfig {
    pub fn for_kind(&self, kind: TargetKind) -> Option<&ArchiveTypeConfig> {
        match kind {
            TargetKind::File => self.file.as_ref(),
            TargetKind::Folder => self.folder.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveTypeConfig {
    pub skip_if_file_exists_in_archive: Vec<String>,
    pub skip_if_file_exists_in_folder: Vec<String>,
    pub skip_if_file_exists_in_parent_folder: Vec<String>,
    pub min_images_to_check: u32,
    pub max_images_to_check: u32,
    pub max_search_errors: u32,
    pub continue_search_if_results_are_ambiguous: bool,
    /// Indices of images to probe first; negative indices count from the
    /// end of the image list.
    pub preferred_image_order: Option<Vec<i64>>,
    pub metadata_file_name_in_archive: Option<String>,
    pub metadata_file_name_in_folder_on_failure: Option<String>,
    pub metadata_file_name_in_folder: Option<String>,
    pub metadata_file_name_in_parent_folder: Option<String>,
}

impl Default for ArchiveTypeConfig {
    fn default() -> Self {
        Self {
            skip_if_file_exists_in_archive: Vec::new(),
            skip_if_file_exists_in_folder: Vec::new(),
            skip_if_file_exists_in_parent_folder: Vec::new(),
            min_images_to_check: 1,
            max_images_to_check: 1,
            max_search_errors: 1,
            continue_search_if_results_are_ambiguous: false,
            preferred_image_order: None,
            metadata_file_name_in_archive: None,
            metadata_file_name_in_folder_on_failure: None,
            metadata_file_name_in_folder: None,
            metadata_file_name_in_parent_folder: None,
        }
    }
}
