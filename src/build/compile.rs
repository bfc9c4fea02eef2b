//! Incremental compilation of source folders.
//!
//! Sources are grouped by extension and each group is compiled as one
//! parallel batch on a bounded pool. A unit whose object is still fresh
//! (see [`object_is_up_to_date`]) is skipped. The first failing unit stops
//! every unit that has not started yet; units already running are left to
//! finish.

use super::depfile::object_is_up_to_date;
use crate::error::{BuildError, BuildResult, IoContext};
use crate::properties::{PropertySet, keys};
use crate::recipe::{self, Executor};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::{DirEntry, WalkDir};

/// Source extensions in compile order.
pub const SOURCE_EXTENSIONS: [&str; 3] = ["S", "c", "cpp"];

const SOURCE_CONTROL_FOLDERS: [&str; 6] = ["CVS", "RCS", ".git", ".svn", ".hg", ".bzr"];

/// One source file and where its outputs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub source: PathBuf,
    pub object: PathBuf,
    pub depfile: PathBuf,
}

impl TranslationUnit {
    /// `<build_dir>/<source relative to root>.o` and `.d` next to it.
    pub fn new(source: &Path, source_root: &Path, build_dir: &Path) -> Self {
        let rel = source
            .strip_prefix(source_root)
            .ok()
            .filter(|r| !r.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(source.file_name().unwrap_or_default()));
        let base = build_dir.join(rel);
        let mut object = base.clone().into_os_string();
        object.push(".o");
        let mut depfile = base.into_os_string();
        depfile.push(".d");
        Self {
            source: source.to_path_buf(),
            object: object.into(),
            depfile: depfile.into(),
        }
    }
}

pub fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|s| s.starts_with('.'))
}

pub fn is_source_control(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|s| SOURCE_CONTROL_FOLDERS.contains(&s))
}

/// Files under `folder` with one of `extensions`, sorted. Hidden entries and
/// source-control folders are skipped. A missing folder has no sources; an
/// unreadable one is an error.
pub fn collect_sources(
    folder: &Path,
    extensions: &[&str],
    recurse: bool,
) -> BuildResult<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Ok(Vec::new());
    }
    let mut walker = WalkDir::new(folder).sort_by_file_name();
    if !recurse {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    let entries = walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(is_hidden(e) || is_source_control(e)));
    for entry in entries {
        let entry = entry.map_err(|e| BuildError::walk(folder, e))?;
        let matches = entry
            .path()
            .extension()
            .and_then(|x| x.to_str())
            .is_some_and(|x| extensions.contains(&x));
        if entry.file_type().is_file() && matches {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Immediate subfolders of `folder`, sorted, minus hidden and source-control ones.
fn subfolders(folder: &Path) -> BuildResult<Vec<PathBuf>> {
    let mut folders = Vec::new();
    let entries = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in entries {
        let entry = entry.map_err(|e| BuildError::walk(folder, e))?;
        if entry.file_type().is_dir() && !is_hidden(&entry) && !is_source_control(&entry) {
            folders.push(entry.into_path());
        }
    }
    Ok(folders)
}

/// Runs compile recipes over source folders.
pub struct Compiler {
    executor: Executor,
    pool: rayon::ThreadPool,
    warnings_level: String,
    show_progress: bool,
}

impl Compiler {
    pub fn new(
        executor: Executor,
        jobs: usize,
        warnings_level: &str,
        show_progress: bool,
    ) -> BuildResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|i| format!("compile-{}", i))
            .build()?;
        Ok(Self {
            executor,
            pool,
            warnings_level: warnings_level.to_string(),
            show_progress,
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Compile the sources directly in `source_root` (or the whole tree when
    /// `recurse` is set) into `build_dir`. Batches run in `.S`, `.c`, `.cpp`
    /// order; the returned objects are sorted lexicographically.
    pub fn compile_files(
        &self,
        props: &PropertySet,
        source_root: &Path,
        build_dir: &Path,
        recurse: bool,
        includes: &[PathBuf],
    ) -> BuildResult<Vec<PathBuf>> {
        let mut objects = Vec::new();
        for ext in SOURCE_EXTENSIONS {
            let recipe = recipe::compile_recipe_for(ext).unwrap_or(keys::RECIPE_CPP_O);
            let units: Vec<TranslationUnit> = collect_sources(source_root, &[ext], recurse)?
                .iter()
                .map(|src| TranslationUnit::new(src, source_root, build_dir))
                .collect();
            if units.is_empty() {
                continue;
            }
            objects.extend(self.compile_batch(props, &units, includes, recipe)?);
        }
        objects.sort();
        Ok(objects)
    }

    /// Compile `source_root` and then each subfolder, depth first, in sorted
    /// order. Each subfolder mirrors into the matching folder under `build_dir`.
    pub fn compile_files_recursive(
        &self,
        props: &PropertySet,
        source_root: &Path,
        build_dir: &Path,
        includes: &[PathBuf],
    ) -> BuildResult<Vec<PathBuf>> {
        let mut objects = self.compile_files(props, source_root, build_dir, false, includes)?;
        for folder in subfolders(source_root)? {
            let Some(name) = folder.file_name() else {
                continue;
            };
            let sub_build = build_dir.join(name);
            objects.extend(self.compile_files_recursive(props, &folder, &sub_build, includes)?);
        }
        Ok(objects)
    }

    fn compile_batch(
        &self,
        props: &PropertySet,
        units: &[TranslationUnit],
        includes: &[PathBuf],
        recipe: &str,
    ) -> BuildResult<Vec<PathBuf>> {
        let pb = if self.show_progress {
            let pb = ProgressBar::new(units.len() as u64);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            pb.set_style(style);
            pb
        } else {
            ProgressBar::hidden()
        };

        let cancelled = AtomicBool::new(false);
        let first_error: Mutex<Option<BuildError>> = Mutex::new(None);

        let results: Vec<BuildResult<PathBuf>> = self.pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    if cancelled.load(Ordering::SeqCst) {
                        return Err(BuildError::Cancelled);
                    }
                    let name = unit
                        .source
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    pb.set_message(format!("Compiling {}", name));

                    let result = self.compile_unit(props, unit, includes, recipe, &pb);
                    if let Err(e) = &result {
                        cancelled.store(true, Ordering::SeqCst);
                        let shown = unit.source.display();
                        pb.println(format!("{} Error compiling {}", "x".red(), shown));
                        tracing::debug!("compilation of {} failed: {}", shown, e);
                    }
                    pb.inc(1);
                    result.map_err(|e| {
                        if let Ok(mut slot) = first_error.lock()
                            && slot.is_none()
                        {
                            *slot = Some(e);
                        }
                        BuildError::Cancelled
                    })
                })
                .collect()
        });

        if let Some(err) = first_error.into_inner().ok().flatten() {
            pb.abandon_with_message("Compilation failed");
            return Err(err);
        }
        pb.finish_and_clear();

        let mut objects = results.into_iter().collect::<BuildResult<Vec<_>>>()?;
        objects.sort();
        Ok(objects)
    }

    fn compile_unit(
        &self,
        props: &PropertySet,
        unit: &TranslationUnit,
        includes: &[PathBuf],
        recipe: &str,
        pb: &ProgressBar,
    ) -> BuildResult<PathBuf> {
        if let Some(parent) = unit.object.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        let mut unit_props = props.clone();
        unit_props.insert(keys::SOURCE_FILE, unit.source.to_string_lossy());
        unit_props.insert(keys::OBJECT_FILE, unit.object.to_string_lossy());
        unit_props.insert(keys::INCLUDES, recipe::include_flags(includes));
        let level_key = format!("{}.{}", keys::COMPILER_WARNING_FLAGS, self.warnings_level);
        let warning_flags = props.get_or_empty(&level_key).to_string();
        unit_props.insert(keys::COMPILER_WARNING_FLAGS, warning_flags);

        if object_is_up_to_date(&unit.source, &unit.object, &unit.depfile)? {
            if self.executor.verbose() {
                pb.println(format!(
                    "{} Using previously compiled file: {}",
                    "→".blue(),
                    unit.object.display()
                ));
            }
            return Ok(unit.object.clone());
        }

        let output = self.executor.exec(&unit_props, recipe)?;
        if !output.stderr.is_empty() && !self.executor.verbose() {
            pb.println(format!(
                "{} Warning in {}:\n{}",
                "!".yellow(),
                unit.source.display(),
                output.stderr.trim_end()
            ));
        }
        Ok(unit.object.clone())
    }
}
