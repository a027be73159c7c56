//! External options store the engine reads (never writes): `shred`,
//! `units_iec`, and a whitelist of paths to never touch. Layered the way
//! the rest of this workspace layers its settings — TOML file under the
//! platform config directory, overridable by environment variables.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitelistKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub kind: WhitelistKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeOptions {
    #[serde(default)]
    pub shred: bool,
    #[serde(default = "default_units_iec")]
    pub units_iec: bool,
    #[serde(default)]
    pub whitelist: Vec<WhitelistEntry>,
}

fn default_units_iec() -> bool {
    true
}

impl Default for WipeOptions {
    fn default() -> Self {
        Self {
            shred: false,
            units_iec: true,
            whitelist: Vec::new(),
        }
    }
}

impl WipeOptions {
    /// Loads `<config dir>/clustershred/config.toml` if present, then
    /// applies `CLUSTERSHRED_*` environment overrides. Missing file is not
    /// an error; it just means defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("shred", false)?
            .set_default("units_iec", true)?;

        if let Some(dirs) = ProjectDirs::from("", "", "clustershred") {
            let config_path = dirs.config_dir().join("config.toml");
            builder = builder.add_source(File::from(config_path).required(false));
        }

        builder = builder.add_source(Environment::with_prefix("CLUSTERSHRED").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("shred", false)?
            .set_default("units_iec", true)?
            .add_source(File::from(path.to_path_buf()))
            .build()?
            .try_deserialize()
    }

    /// True when `path` (or one of its ancestors, for a `Folder` entry)
    /// matches the whitelist and must never be wiped.
    pub fn is_whitelisted(&self, path: &Path) -> bool {
        self.whitelist.iter().any(|entry| match entry.kind {
            WhitelistKind::File => entry.path == path,
            WhitelistKind::Folder => path.starts_with(&entry.path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let opts = WipeOptions::default();
        assert!(!opts.shred);
        assert!(opts.units_iec);
        assert!(opts.whitelist.is_empty());
    }

    #[test]
    fn folder_whitelist_covers_descendants() {
        let opts = WipeOptions {
            whitelist: vec![WhitelistEntry {
                kind: WhitelistKind::Folder,
                path: PathBuf::from("/keep"),
            }],
            ..WipeOptions::default()
        };
        assert!(opts.is_whitelisted(Path::new("/keep/nested/file.txt")));
        assert!(!opts.is_whitelisted(Path::new("/other/file.txt")));
    }

    #[test]
    fn file_whitelist_is_exact() {
        let opts = WipeOptions {
            whitelist: vec![WhitelistEntry {
                kind: WhitelistKind::File,
                path: PathBuf::from("/keep/a.txt"),
            }],
            ..WipeOptions::default()
        };
        assert!(opts.is_whitelisted(Path::new("/keep/a.txt")));
        assert!(!opts.is_whitelisted(Path::new("/keep/b.txt")));
    }
}
