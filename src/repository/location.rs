//! Where vendor documents live on disk

use std::env;
use std::path::{Path, PathBuf};

/// Overrides the detection pattern directory
pub const PATTERNS_DIR_ENV: &str = "PIDGEON_VENDOR_PATTERNS_DIR";

/// Overrides the vendor specification directory
pub const SPECS_DIR_ENV: &str = "PIDGEON_VENDOR_SPECS_DIR";

const CONFIG_DIR_NAME: &str = ".pidgeon";
const VENDORS_DIR_NAME: &str = "vendors";
const SPECS_DIR_NAME: &str = "specs";

/// Resolved directories for the vendor repositories.
///
/// Precedence: environment override, then `~/.pidgeon/vendors[/specs]`, then
/// `./vendors[/specs]` when no home directory is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub patterns_dir: PathBuf,
    pub specs_dir: PathBuf,
}

impl StorageLocation {
    /// Resolve from the process environment
    pub fn from_env() -> Self {
        Self::resolve(|key| env::var(key).ok())
    }

    /// Both directories under an explicit root
    pub fn under(root: impl AsRef<Path>) -> Self {
        let patterns_dir = root.as_ref().to_path_buf();
        Self {
            specs_dir: patterns_dir.join(SPECS_DIR_NAME),
            patterns_dir,
        }
    }

    /// Resolve with an injectable variable lookup
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let default_root = non_empty("HOME")
            .or_else(|| non_empty("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(CONFIG_DIR_NAME).join(VENDORS_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(".").join(VENDORS_DIR_NAME));

        Self {
            patterns_dir: non_empty(PATTERNS_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| default_root.clone()),
            specs_dir: non_empty(SPECS_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| default_root.join(SPECS_DIR_NAME)),
        }
    }
}
