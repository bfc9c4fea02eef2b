//! Project configuration (`sketch.toml`).
//!
//! ```toml
//! [project]
//! sketch = "Blink"
//! fqbn = "arduino:avr:uno"
//!
//! [platform]
//! properties = ["hardware/avr/platform.txt"]
//! boards = "hardware/avr/boards.txt"
//! board = "uno"
//!
//! [libraries]
//! folders = ["libraries"]
//! ```
//!
//! Relative paths are resolved against the folder holding `sketch.toml`.

use crate::cache;
use crate::error::{BuildError, BuildResult, IoContext};
use crate::properties::{PropertySet, keys};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "sketch.toml";

#[derive(Deserialize, Debug, Default)]
pub struct SketchConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    /// Inline overrides, merged last
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub libraries: LibrariesConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ProjectConfig {
    pub sketch: PathBuf,
    pub fqbn: String,
    pub arch: Option<String>,
    pub build_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
pub struct PlatformConfig {
    #[serde(default)]
    pub properties: Vec<PathBuf>,
    pub boards: Option<PathBuf>,
    pub board: Option<String>,
    pub core: Option<PathBuf>,
    pub variant: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
pub struct LibrariesConfig {
    #[serde(default)]
    pub folders: Vec<PathBuf>,
}

#[derive(Deserialize, Debug)]
pub struct BuildConfig {
    pub jobs: Option<usize>,
    #[serde(default = "default_warnings")]
    pub warnings: String,
    #[serde(default = "default_cache")]
    pub cache: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            warnings: default_warnings(),
            cache: default_cache(),
            cache_dir: None,
        }
    }
}

fn default_warnings() -> String {
    "default".to_string()
}

fn default_cache() -> bool {
    true
}

/// A parsed `sketch.toml` plus the folder it came from.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config: SketchConfig,
}

impl Project {
    pub fn load(config_path: &Path) -> BuildResult<Self> {
        let text = fs::read_to_string(config_path).at(config_path)?;
        let config: SketchConfig = toml::from_str(&text)
            .map_err(|e| BuildError::Config(format!("{}: {}", config_path.display(), e)))?;
        if config.project.fqbn.is_empty() {
            return Err(BuildError::Config("project.fqbn must not be empty".to_string()));
        }
        let root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let root = std::path::absolute(&root).at(&root)?;
        Ok(Self { root, config })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn sketch_path(&self) -> PathBuf {
        self.resolve(&self.config.project.sketch)
    }

    pub fn build_path(&self) -> PathBuf {
        match &self.config.project.build_path {
            Some(p) => self.resolve(p),
            None => self.root.join("build"),
        }
    }

    pub fn fqbn(&self) -> &str {
        &self.config.project.fqbn
    }

    /// Configured architecture, or the second segment of the fqbn.
    pub fn arch(&self) -> String {
        self.config
            .project
            .arch
            .clone()
            .or_else(|| self.fqbn().split(':').nth(1).map(str::to_string))
            .unwrap_or_default()
    }

    pub fn library_folders(&self) -> Vec<PathBuf> {
        self.config.libraries.folders.iter().map(|f| self.resolve(f)).collect()
    }

    /// `None` when caching is disabled.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if !self.config.build.cache {
            return None;
        }
        match &self.config.build.cache_dir {
            Some(dir) => Some(self.resolve(dir)),
            None => cache::default_cache_dir(),
        }
    }

    pub fn jobs(&self) -> Option<usize> {
        self.config.build.jobs
    }

    pub fn warnings_level(&self) -> &str {
        &self.config.build.warnings
    }

    /// Merge platform property files, the selected board and the inline
    /// overrides, in that order. Each `.txt` file is followed by its
    /// optional `.local.txt` sibling.
    ///
    /// `runtime.platform.path` defaults to the folder of the first platform
    /// file. When `core`/`variant` are not configured they are derived from
    /// `build.core`/`build.variant` under that folder's `cores/` and
    /// `variants/`.
    pub fn build_properties(&self) -> BuildResult<PropertySet> {
        let platform = &self.config.platform;
        let mut props = PropertySet::new();

        for file in &platform.properties {
            props.merge(&load_with_local(&self.resolve(file))?);
        }

        if let Some(boards) = &platform.boards {
            let boards = load_with_local(&self.resolve(boards))?;
            let board = platform.board.as_deref().ok_or_else(|| {
                BuildError::Config("platform.boards is set but platform.board is not".to_string())
            })?;
            let board_props = boards.sub_tree(board);
            if board_props.is_empty() {
                return Err(BuildError::Config(format!(
                    "board '{}' not found in boards file",
                    board
                )));
            }
            props.merge(&board_props);
        }

        let platform_folder = platform
            .properties
            .first()
            .map(|f| self.resolve(f))
            .and_then(|f| f.parent().map(Path::to_path_buf));
        if let Some(folder) = &platform_folder
            && !props.contains_key(keys::RUNTIME_PLATFORM_PATH)
        {
            props.insert(keys::RUNTIME_PLATFORM_PATH, folder.to_string_lossy());
        }

        let core = match &platform.core {
            Some(core) => Some(self.resolve(core)),
            None => derived_folder(&props, platform_folder.as_deref(), "build.core", "cores"),
        };
        if let Some(core) = core {
            props.insert(keys::BUILD_CORE_PATH, core.to_string_lossy());
        }

        let variant = match &platform.variant {
            Some(variant) => Some(self.resolve(variant)),
            None => derived_folder(&props, platform_folder.as_deref(), "build.variant", "variants"),
        };
        if let Some(variant) = variant {
            props.insert(keys::BUILD_VARIANT_PATH, variant.to_string_lossy());
        }

        for (key, value) in &self.config.properties {
            props.insert(key.as_str(), value.as_str());
        }
        Ok(props)
    }
}

/// Load `file`, then let `<stem>.local.txt` next to it override its keys.
fn load_with_local(file: &Path) -> BuildResult<PropertySet> {
    let mut props = PropertySet::load(file)?;
    if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
        let local = file.with_file_name(format!("{}.local.txt", stem));
        props.merge(&PropertySet::safe_load(&local)?);
    }
    Ok(props)
}

/// `<platform>/<sub>/<props[key]>`, ignoring `vendor:` prefixes.
fn derived_folder(
    props: &PropertySet,
    platform: Option<&Path>,
    key: &str,
    sub: &str,
) -> Option<PathBuf> {
    let name = props.get(key).filter(|v| !v.is_empty())?;
    let name = name.rsplit(':').next().unwrap_or(name);
    platform.map(|p| p.join(sub).join(name))
}
