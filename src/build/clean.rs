//! Build folder housekeeping.
//!
//! - `build.options.json` remembers what the last build was made from. When
//!   that changes, or the platform's `.txt` build rules are touched after it
//!   was written, the build folder is emptied before building again.
//! - `sb clean` removes the build folder outright.

use super::archive::txt_build_rules_changed;
use crate::error::{BuildResult, IoContext};
use crate::properties::{PropertySet, keys};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const BUILD_OPTIONS_FILE: &str = "build.options.json";

/// Inputs that invalidate every artifact when they change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptionsRecord {
    pub fqbn: String,
    pub sketch_location: String,
    pub warnings_level: String,
    #[serde(default)]
    pub library_folders: Vec<String>,
    /// Digest of the build properties, minus timestamps and locations
    pub properties_digest: String,
}

impl BuildOptionsRecord {
    /// Digest of `props` without the per-build timestamps and the sketch and
    /// build folder locations, which are tracked by `sketch_location` alone.
    pub fn digest_of(props: &PropertySet) -> String {
        let stable: PropertySet = props
            .iter()
            .filter(|(k, _)| {
                !k.starts_with("extra.time.")
                    && *k != keys::BUILD_SOURCE_PATH
                    && *k != keys::BUILD_PATH
            })
            .collect();
        stable.digest()
    }

    pub fn load(build_path: &Path) -> Option<Self> {
        let text = fs::read_to_string(build_path.join(BUILD_OPTIONS_FILE)).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn store(&self, build_path: &Path) -> BuildResult<()> {
        fs::create_dir_all(build_path).at(build_path)?;
        let path = build_path.join(BUILD_OPTIONS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).at(&path)
    }

    /// True when switching from `previous` to `self` needs a clean build.
    /// Moving the sketch to another folder with the same name does not.
    pub fn requires_wipe(&self, previous: &Self) -> bool {
        if self == previous {
            return false;
        }
        let same_name = |a: &str, b: &str| Path::new(a).file_name() == Path::new(b).file_name();
        let relocated_only = Self {
            sketch_location: previous.sketch_location.clone(),
            ..self.clone()
        } == *previous;
        !(relocated_only && same_name(&self.sketch_location, &previous.sketch_location))
    }
}

/// Empty `build_path` when `current` differs from the stored options or the
/// platform build rules changed since they were stored. Returns whether the
/// folder was wiped.
pub fn wipe_build_path_if_options_changed(
    build_path: &Path,
    current: &BuildOptionsRecord,
    core_folder: Option<&Path>,
    target_core: Option<&Path>,
) -> BuildResult<bool> {
    let Some(previous) = BuildOptionsRecord::load(build_path) else {
        return Ok(false);
    };

    let rules_changed = core_folder.is_some_and(|core| {
        txt_build_rules_changed(core, target_core, &build_path.join(BUILD_OPTIONS_FILE))
    });
    if !current.requires_wipe(&previous) && !rules_changed {
        return Ok(false);
    }

    println!("{} Build options changed, rebuilding all", "!".yellow());
    remove_contents(build_path)?;
    Ok(true)
}

fn remove_contents(folder: &Path) -> BuildResult<()> {
    for entry in fs::read_dir(folder).at(folder)? {
        let path = entry.at(folder)?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).at(&path)?;
        } else {
            fs::remove_file(&path).at(&path)?;
        }
    }
    Ok(())
}

/// Remove the whole build folder. Returns false when there was nothing to do.
pub fn clean(build_path: &Path) -> BuildResult<bool> {
    if !build_path.exists() {
        println!("{} Nothing to clean", "!".yellow());
        return Ok(false);
    }
    fs::remove_dir_all(build_path).at(build_path)?;
    println!("{} Removed {}", "✓".green(), build_path.display());
    Ok(true)
}
