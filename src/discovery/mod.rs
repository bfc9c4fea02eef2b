//! Include and library discovery.
//!
//! Each translation unit is preprocessed repeatedly. Every run that reports
//! missing headers resolves them to libraries, adds those libraries to the
//! include path and queues their sources, and then tries again. A unit is
//! done once it preprocesses cleanly or a round imports nothing new. The
//! import set only grows, so this settles after at most one round per
//! library.
//!
//! ## Flow
//!
//! 1. The merged sketch is processed first and its final preprocessed form
//!    is kept for later tooling.
//! 2. Sources from the sketch build folder and its `src/` tree follow.
//! 3. Sources from each newly imported library are queued as they appear.

pub mod preproc;

use crate::build::compile::{SOURCE_EXTENSIONS, collect_sources};
use crate::error::{BuildError, BuildResult};
use crate::library::{ImportedLibraries, Library, LibraryResolver, Resolution, SourceFolder};
use crate::properties::PropertySet;
use crate::recipe::{self, Executor};
use colored::*;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::path::{Path, PathBuf};

/// FIFO queue that ignores anything it has ever held.
#[derive(Debug, Clone)]
pub struct UniqueQueue<T> {
    items: VecDeque<T>,
    seen: HashSet<T>,
}

impl<T: Clone + Eq + Hash> Default for UniqueQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            seen: HashSet::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> UniqueQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when `item` was queued before.
    pub fn push(&mut self, item: T) -> bool {
        if !self.seen.insert(item.clone()) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

pub type SourceFolderQueue = UniqueQueue<SourceFolder>;

/// What discovery found.
#[derive(Debug, Clone)]
pub struct DiscoveryResult<'a> {
    pub imported_libraries: Vec<&'a Library>,
    pub include_folders: Vec<PathBuf>,
    /// Rounds in which at least one missing header was resolved
    pub resolution_passes: usize,
    pub warnings: Vec<String>,
    /// `<preproc_dir>/ctags_target_for_gcc_minus_e.cpp`
    pub preprocessed_sketch: Option<PathBuf>,
}

/// Single-owner discovery state for one build.
pub struct Discovery<'a> {
    executor: &'a Executor,
    props: &'a PropertySet,
    resolver: LibraryResolver<'a>,
    imported: ImportedLibraries<'a>,
    include_folders: Vec<PathBuf>,
    folders: SourceFolderQueue,
    sources: UniqueQueue<PathBuf>,
    resolution_passes: usize,
    warnings: Vec<String>,
    preprocessed_sketch: Option<PathBuf>,
}

impl<'a> Discovery<'a> {
    pub fn new(
        executor: &'a Executor,
        props: &'a PropertySet,
        libraries: &'a [Library],
        arch: &str,
    ) -> Self {
        let mut include_folders = Vec::new();
        include_folders.extend(props.core_path());
        include_folders.extend(props.variant_path());
        Self {
            executor,
            props,
            resolver: LibraryResolver::new(libraries, arch),
            imported: ImportedLibraries::new(),
            include_folders,
            folders: SourceFolderQueue::new(),
            sources: UniqueQueue::new(),
            resolution_passes: 0,
            warnings: Vec::new(),
            preprocessed_sketch: None,
        }
    }

    /// Run discovery from the merged sketch in `sketch_build_dir`.
    pub fn run(
        mut self,
        merged_sketch: &Path,
        sketch_build_dir: &Path,
        preproc_dir: &Path,
    ) -> BuildResult<DiscoveryResult<'a>> {
        self.sources.push(merged_sketch.to_path_buf());
        self.folders.push(SourceFolder {
            folder: sketch_build_dir.to_path_buf(),
            recurse: false,
        });
        let src = sketch_build_dir.join("src");
        if src.is_dir() {
            self.folders.push(SourceFolder {
                folder: src,
                recurse: true,
            });
        }
        self.drain_folders()?;

        let mut primary = true;
        while let Some(source) = self.sources.pop() {
            let target = primary.then(|| preproc_dir.join(preproc::CTAGS_TARGET));
            self.find_includes_until_done(&source, target.as_deref())?;
            if primary {
                self.preprocessed_sketch = target;
                primary = false;
            }
            self.drain_folders()?;
        }

        tracing::debug!(
            "discovery finished: {} libraries in {} passes",
            self.imported.len(),
            self.resolution_passes
        );

        Ok(DiscoveryResult {
            imported_libraries: self.imported.to_vec(),
            include_folders: self.include_folders,
            resolution_passes: self.resolution_passes,
            warnings: self.warnings,
            preprocessed_sketch: self.preprocessed_sketch,
        })
    }

    /// Iterate on one unit until it preprocesses cleanly or stops importing.
    /// `final_target` receives the last preprocessed output for the sketch.
    fn find_includes_until_done(
        &mut self,
        source: &Path,
        final_target: Option<&Path>,
    ) -> BuildResult<()> {
        let null = PathBuf::from(recipe::null_file());
        let final_target = final_target.unwrap_or(&null);

        loop {
            let headers = preproc::find_missing_headers(
                self.executor,
                self.props,
                source,
                &self.include_folders,
            )?;
            if headers.is_empty() {
                if final_target != null.as_path() {
                    self.preprocess_to(source, final_target)?;
                }
                return Ok(());
            }

            let before = self.imported.len();
            for header in &headers {
                self.import_library_for(source, header)?;
            }
            self.resolution_passes += 1;

            if self.imported.len() == before {
                // Nothing new to offer; let the preprocessor report the real error.
                return self.preprocess_to(source, final_target);
            }
        }
    }

    fn preprocess_to(&self, source: &Path, target: &Path) -> BuildResult<()> {
        preproc::preprocess_to(self.executor, self.props, source, target, &self.include_folders)
    }

    fn import_library_for(&mut self, source: &Path, header: &str) -> BuildResult<()> {
        let library = match self.resolver.resolve(header, &self.imported) {
            Resolution::NotFound => {
                return Err(BuildError::LibraryNotFound {
                    source_file: source.to_path_buf(),
                    header: header.to_string(),
                });
            }
            Resolution::Found(library) => library,
            Resolution::Ambiguous { chosen, candidates } => {
                let mut message = format!("Multiple libraries were found for \"{}\"\n", header);
                message.push_str(&format!("  Used: {}\n", chosen.folder.display()));
                for other in candidates.iter().filter(|c| c.src_folder != chosen.src_folder) {
                    message.push_str(&format!("  Not used: {}\n", other.folder.display()));
                }
                eprint!("{} {}", "!".yellow(), message);
                self.warnings.push(message);
                chosen
            }
        };

        if self.imported.insert(library) {
            tracing::debug!("{} provides {}", library.name, header);
            if !self.include_folders.contains(&library.src_folder) {
                self.include_folders.push(library.src_folder.clone());
            }
            for folder in library.source_folders() {
                self.folders.push(folder);
            }
        }
        Ok(())
    }

    fn drain_folders(&mut self) -> BuildResult<()> {
        while let Some(folder) = self.folders.pop() {
            for file in collect_sources(&folder.folder, &SOURCE_EXTENSIONS, folder.recurse)? {
                self.sources.push(file);
            }
        }
        Ok(())
    }
}

/// Reject imported libraries with an unsupported structure.
pub fn validate_imported_libraries(libraries: &[&Library]) -> BuildResult<()> {
    libraries.iter().try_for_each(|l| l.validate())
}
