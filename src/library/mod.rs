//! Library model and catalog loading.
//!
//! A library is a folder. With a `library.properties` file it is a regular
//! library (recursive layout when it has `src/`, flat otherwise); without
//! one it is a legacy flat library. Libraries never change during a build.

pub mod resolver;

use crate::error::{BuildError, BuildResult};
use crate::properties::PropertySet;
use std::fs;
use std::path::{Path, PathBuf};

pub use resolver::{LibraryResolver, Resolution};

pub const LIBRARY_PROPERTIES: &str = "library.properties";

/// Keys a non-legacy `library.properties` must declare.
pub const MANDATORY_PROPERTIES: [&str; 7] = [
    "name",
    "version",
    "author",
    "maintainer",
    "sentence",
    "paragraph",
    "url",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryLayout {
    /// Sources at the top level, plus an optional `utility/` folder
    Flat,
    /// Sources anywhere under `src/`
    Recursive,
}

/// A folder the discovery loop scans for sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFolder {
    pub folder: PathBuf,
    pub recurse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Library {
    /// Folder name, used for build output folders
    pub name: String,
    /// `name` from `library.properties` (folder name for legacy libraries)
    pub real_name: String,
    pub folder: PathBuf,
    pub src_folder: PathBuf,
    pub utility_folder: Option<PathBuf>,
    pub layout: LibraryLayout,
    pub architectures: Vec<String>,
    pub precompiled: bool,
    pub ld_flags: String,
    pub dot_a_linkage: bool,
    pub version: String,
    pub is_legacy: bool,
    pub properties: PropertySet,
}

impl Library {
    pub fn load(folder: &Path) -> BuildResult<Self> {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| BuildError::invalid_library(folder, "library folder has no name"))?;

        let props_file = folder.join(LIBRARY_PROPERTIES);
        if !props_file.is_file() {
            return Ok(Self::legacy(folder, name));
        }

        let mut properties = PropertySet::load(&props_file)?;
        if properties.get_or_empty("maintainer").is_empty()
            && let Some(email) = properties.get("email").map(str::to_string)
        {
            properties.insert("maintainer", email);
        }

        let src = folder.join("src");
        let (layout, src_folder, utility_folder) = if src.is_dir() {
            (LibraryLayout::Recursive, src, None)
        } else {
            (LibraryLayout::Flat, folder.to_path_buf(), utility_of(folder))
        };

        let architectures = match properties.get_or_empty("architectures").trim() {
            "" => vec!["*".to_string()],
            list => list.split(',').map(|a| a.trim().to_string()).collect(),
        };
        let flag = |key: &str| properties.get_or_empty(key).trim() == "true";

        Ok(Self {
            real_name: match properties.get_or_empty("name").trim() {
                "" => name.clone(),
                n => n.to_string(),
            },
            name,
            folder: folder.to_path_buf(),
            src_folder,
            utility_folder,
            layout,
            architectures,
            precompiled: flag("precompiled"),
            dot_a_linkage: flag("dot_a_linkage"),
            ld_flags: properties.get_or_empty("ldflags").trim().to_string(),
            version: properties.get_or_empty("version").trim().to_string(),
            is_legacy: false,
            properties,
        })
    }

    fn legacy(folder: &Path, name: String) -> Self {
        Self {
            real_name: name.clone(),
            name,
            folder: folder.to_path_buf(),
            src_folder: folder.to_path_buf(),
            utility_folder: utility_of(folder),
            layout: LibraryLayout::Flat,
            architectures: vec!["*".to_string()],
            precompiled: false,
            ld_flags: String::new(),
            dot_a_linkage: false,
            version: String::new(),
            is_legacy: true,
            properties: PropertySet::new(),
        }
    }

    /// `*`, an empty declaration, or an exact match.
    pub fn supports_architecture(&self, arch: &str) -> bool {
        self.architectures.is_empty()
            || self
                .architectures
                .iter()
                .any(|a| a == "*" || a.eq_ignore_ascii_case(arch))
    }

    /// Folders whose sources belong to this library.
    pub fn source_folders(&self) -> Vec<SourceFolder> {
        match self.layout {
            LibraryLayout::Recursive => vec![SourceFolder {
                folder: self.src_folder.clone(),
                recurse: true,
            }],
            LibraryLayout::Flat => {
                let mut folders = vec![SourceFolder {
                    folder: self.src_folder.clone(),
                    recurse: false,
                }];
                if let Some(utility) = &self.utility_folder {
                    folders.push(SourceFolder {
                        folder: utility.clone(),
                        recurse: false,
                    });
                }
                folders
            }
        }
    }

    /// Structural checks for libraries that made it into a build.
    pub fn validate(&self) -> BuildResult<()> {
        if self.is_legacy {
            return Ok(());
        }
        if self.folder.join("arch").is_dir() {
            return Err(BuildError::invalid_library(
                &self.folder,
                "'arch' folder is no longer supported",
            ));
        }
        for key in MANDATORY_PROPERTIES {
            if !self.properties.contains_key(key) {
                return Err(BuildError::invalid_library(
                    &self.folder,
                    format!("missing '{}' in {}", key, LIBRARY_PROPERTIES),
                ));
            }
        }
        if self.layout == LibraryLayout::Recursive && self.folder.join("utility").is_dir() {
            return Err(BuildError::invalid_library(
                &self.folder,
                "library can't use both 'src' and 'utility' folders",
            ));
        }
        Ok(())
    }
}

fn utility_of(folder: &Path) -> Option<PathBuf> {
    let utility = folder.join("utility");
    utility.is_dir().then_some(utility)
}

/// Load every library found in `folders`, in order. A library whose folder
/// name was already seen replaces the earlier one in place.
pub fn load_libraries(folders: &[PathBuf]) -> BuildResult<Vec<Library>> {
    let mut libraries: Vec<Library> = Vec::new();

    for root in folders {
        if !root.is_dir() {
            tracing::debug!("skipping missing libraries folder {}", root.display());
            continue;
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(root).map_err(|e| BuildError::io(root, e))? {
            let path = entry.map_err(|e| BuildError::io(root, e))?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if path.is_dir() && !hidden {
                entries.push(path);
            }
        }
        entries.sort();

        for folder in entries {
            let library = Library::load(&folder)?;
            match libraries.iter_mut().find(|l| l.name == library.name) {
                Some(existing) => {
                    tracing::debug!(
                        "{} overrides {}",
                        library.folder.display(),
                        existing.folder.display()
                    );
                    *existing = library;
                }
                None => libraries.push(library),
            }
        }
    }

    Ok(libraries)
}

/// Libraries imported by a build: ordered, duplicate free, only grows.
/// Identity is the source folder.
#[derive(Debug, Clone, Default)]
pub struct ImportedLibraries<'a> {
    libraries: Vec<&'a Library>,
}

impl<'a> ImportedLibraries<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the library was already imported.
    pub fn insert(&mut self, library: &'a Library) -> bool {
        if self.contains(library) {
            return false;
        }
        self.libraries.push(library);
        true
    }

    pub fn contains(&self, library: &Library) -> bool {
        self.libraries.iter().any(|l| l.src_folder == library.src_folder)
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Library> + '_ {
        self.libraries.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<&'a Library> {
        self.libraries.clone()
    }
}
