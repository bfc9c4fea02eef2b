//! Layered `key=value` build properties.
//!
//! A [`PropertySet`] is the string bag every recipe is expanded against.
//! Platform, board and user layers are merged in precedence order (later
//! wins), then cloned and specialized for each translation unit.
//!
//! ## Example
//!
//! ```rust
//! use sketchbuild::properties::PropertySet;
//!
//! let mut props = PropertySet::new();
//! props.insert("compiler.path", "/opt/avr/bin/");
//! props.insert("recipe", "{compiler.path}avr-gcc -c {source_file}");
//! props.insert("source_file", "main.cpp");
//!
//! assert_eq!(
//!     props.expand(props.get("recipe").unwrap()),
//!     "/opt/avr/bin/avr-gcc -c main.cpp"
//! );
//! ```

use crate::error::{BuildError, BuildResult, IoContext};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Upper bound on expansion passes. Guarantees termination on cyclic keys.
pub const MAX_EXPANSION_PASSES: usize = 10;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder regex"));

static UNEXPANDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{.+?\}").expect("unexpanded regex"));

/// Well-known property keys.
pub mod keys {
    pub const ARCHIVE_FILE: &str = "archive_file";
    pub const ARCHIVE_FILE_PATH: &str = "archive_file_path";
    pub const BUILD_ARCH: &str = "build.arch";
    pub const BUILD_CORE_PATH: &str = "build.core.path";
    pub const BUILD_FQBN: &str = "build.fqbn";
    pub const BUILD_MCU: &str = "build.mcu";
    pub const BUILD_PATH: &str = "build.path";
    pub const BUILD_PROJECT_NAME: &str = "build.project_name";
    pub const BUILD_SOURCE_PATH: &str = "build.source.path";
    pub const BUILD_VARIANT_PATH: &str = "build.variant.path";
    pub const COMPILER_C_ELF_EXTRA_FLAGS: &str = "compiler.c.elf.extra_flags";
    pub const COMPILER_C_ELF_FLAGS: &str = "compiler.c.elf.flags";
    pub const COMPILER_CPP_FLAGS: &str = "compiler.cpp.flags";
    pub const COMPILER_WARNING_FLAGS: &str = "compiler.warning_flags";
    pub const EXTRA_TIME_DST: &str = "extra.time.dst";
    pub const EXTRA_TIME_LOCAL: &str = "extra.time.local";
    pub const EXTRA_TIME_UTC: &str = "extra.time.utc";
    pub const EXTRA_TIME_ZONE: &str = "extra.time.zone";
    pub const INCLUDES: &str = "includes";
    pub const OBJECT_FILE: &str = "object_file";
    pub const OBJECT_FILES: &str = "object_files";
    pub const PREPROCESSED_FILE_PATH: &str = "preprocessed_file_path";
    pub const RUNTIME_OS: &str = "runtime.os";
    pub const RUNTIME_PLATFORM_PATH: &str = "runtime.platform.path";
    pub const SOURCE_FILE: &str = "source_file";

    pub const RECIPE_AR: &str = "recipe.ar.pattern";
    pub const RECIPE_C_COMBINE: &str = "recipe.c.combine.pattern";
    pub const RECIPE_C_O: &str = "recipe.c.o.pattern";
    pub const RECIPE_CPP_O: &str = "recipe.cpp.o.pattern";
    pub const RECIPE_PREPROC_MACROS: &str = "recipe.preproc.macros";
    pub const RECIPE_S_O: &str = "recipe.S.o.pattern";
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    map: BTreeMap<String, String>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Value for `key`, or `""` when absent.
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    /// Value for `key`, failing with [`BuildError::MissingRecipe`] when
    /// absent or empty.
    pub fn require(&self, key: &str) -> BuildResult<&str> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(BuildError::missing_recipe(key)),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.map.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overwrite our keys with `source`'s keys.
    pub fn merge(&mut self, source: &PropertySet) -> &mut Self {
        for (key, value) in &source.map {
            self.map.insert(key.clone(), value.clone());
        }
        self
    }

    /// Merge every source in order; the last one wins on collisions.
    pub fn merge_all<'a>(
        &mut self,
        sources: impl IntoIterator<Item = &'a PropertySet>,
    ) -> &mut Self {
        for source in sources {
            self.merge(source);
        }
        self
    }

    /// Replace `{key}` placeholders with their values, repeating so that
    /// values which are themselves templates get expanded too.
    ///
    /// Unknown placeholders are left verbatim. At most
    /// [`MAX_EXPANSION_PASSES`] passes are made.
    pub fn expand(&self, value: &str) -> String {
        let mut current = value.to_string();
        for _ in 0..MAX_EXPANSION_PASSES {
            let next = PLACEHOLDER
                .replace_all(&current, |caps: &Captures| match self.map.get(&caps[1]) {
                    Some(v) => v.clone(),
                    None => caps[0].to_string(),
                })
                .into_owned();
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Expanded value of `key`, if present.
    pub fn expand_key(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| self.expand(v))
    }

    /// Group keys by their first dotted segment, stripping it.
    /// Keys without a dot are dropped.
    pub fn first_level_of(&self) -> BTreeMap<String, PropertySet> {
        let mut groups: BTreeMap<String, PropertySet> = BTreeMap::new();
        for (key, value) in &self.map {
            if let Some((head, rest)) = key.split_once('.') {
                groups
                    .entry(head.to_string())
                    .or_default()
                    .insert(rest, value.clone());
            }
        }
        groups
    }

    /// Keys under `prefix.` with the prefix removed.
    pub fn sub_tree(&self, prefix: &str) -> PropertySet {
        let mut tree = PropertySet::new();
        for (key, value) in &self.map {
            if let Some((head, rest)) = key.split_once('.')
                && head == prefix
            {
                tree.insert(rest, value.clone());
            }
        }
        tree
    }

    /// Stable digest of every key and value, used to detect option changes
    /// between builds.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        for (key, value) in &self.map {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([b'\n']);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Parse `key=value` text. `origin` only appears in error messages.
    pub fn parse(text: &str, origin: &str) -> BuildResult<Self> {
        let mut props = PropertySet::new();
        let suffix = format!(".{}", os_suffix());
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut os_specific = Vec::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(BuildError::InvalidProperties {
                    line: line.to_string(),
                    origin: origin.to_string(),
                });
            };
            let key = key.trim();
            match key.strip_suffix(&suffix) {
                Some(generic) => os_specific.push((generic.to_string(), value.trim().to_string())),
                None => {
                    props.insert(key, value.trim());
                }
            }
        }
        // OS-specific keys override the generic ones wherever they appear.
        for (key, value) in os_specific {
            props.insert(key, value);
        }
        Ok(props)
    }

    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = fs::read_to_string(path).at(path)?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Like [`PropertySet::load`], but a missing file yields an empty set.
    pub fn safe_load(path: &Path) -> BuildResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        Self::load(path)
    }

    // --- Typed accessors ---

    fn path_value(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
    }

    pub fn core_path(&self) -> Option<PathBuf> {
        self.path_value(keys::BUILD_CORE_PATH)
    }

    pub fn variant_path(&self) -> Option<PathBuf> {
        self.path_value(keys::BUILD_VARIANT_PATH)
    }

    pub fn build_path(&self) -> Option<PathBuf> {
        self.path_value(keys::BUILD_PATH)
    }

    pub fn platform_path(&self) -> Option<PathBuf> {
        self.path_value(keys::RUNTIME_PLATFORM_PATH)
    }

    pub fn mcu(&self) -> &str {
        self.get_or_empty(keys::BUILD_MCU)
    }

    pub fn fqbn(&self) -> &str {
        self.get_or_empty(keys::BUILD_FQBN)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = PropertySet::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// Remove any `{...}` span left over after expansion.
pub fn strip_unexpanded(value: &str) -> String {
    UNEXPANDED.replace_all(value, "").into_owned()
}

/// OS name used for `.linux` / `.windows` / `.macosx` key suffixes.
pub fn os_suffix() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macosx",
        other => other,
    }
}
