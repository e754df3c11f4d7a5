use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "SHADERFIELD_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "SHADERFIELD_DATA_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Shaderfield";
const APPLICATION: &str = "shaderfield";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let config_override = env_override(ENV_CONFIG_DIR);
        let data_override = env_override(ENV_DATA_DIR);
        if let (Some(config_dir), Some(data_dir)) = (&config_override, &data_override) {
            return Ok(Self {
                config_dir: config_dir.clone(),
                data_dir: data_dir.clone(),
            });
        }

        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;

        Ok(Self {
            config_dir: config_override.unwrap_or_else(|| project_dirs.config_dir().to_path_buf()),
            data_dir: data_override.unwrap_or_else(|| project_dirs.data_dir().to_path_buf()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directories searched, in order, when an effect is named rather than
    /// given as a path.
    pub fn effect_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.config_dir.join("effects"),
            self.data_dir.join("effects"),
        ]
    }
}

#[cfg(test)]
impl AppPaths {
    pub fn from_raw(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            config_dir,
            data_dir,
        }
    }
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.as_os_str().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
