//! Libraries phase.

use super::archive::archive_compiled_files;
use super::compile::Compiler;
use crate::error::{BuildError, BuildResult, IoContext};
use crate::library::{Library, LibraryLayout};
use crate::properties::PropertySet;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compile every imported library into `<libraries_build_dir>/<name>`,
/// returning objects (or `.a` archives) in import order.
pub fn build_libraries(
    compiler: &Compiler,
    props: &PropertySet,
    libraries_build_dir: &Path,
    libraries: &[&Library],
    includes: &[PathBuf],
) -> BuildResult<Vec<PathBuf>> {
    fs::create_dir_all(libraries_build_dir).at(libraries_build_dir)?;
    let mut objects = Vec::new();
    for library in libraries {
        objects.extend(build_library(compiler, props, libraries_build_dir, library, includes)?);
    }
    Ok(objects)
}

fn build_library(
    compiler: &Compiler,
    props: &PropertySet,
    libraries_build_dir: &Path,
    library: &Library,
    includes: &[PathBuf],
) -> BuildResult<Vec<PathBuf>> {
    if compiler.executor().verbose() {
        println!("{} Compiling library \"{}\"", "→".blue(), library.name);
    }
    let build_dir = libraries_build_dir.join(&library.name);
    fs::create_dir_all(&build_dir).at(&build_dir)?;

    let mut objects = Vec::new();

    if library.precompiled {
        let mcu_folder = library.src_folder.join(props.mcu());
        objects.extend(
            files_with_extension(&mcu_folder, "a")?
                .into_iter()
                .filter(|p| {
                    p.file_name()
                        .is_some_and(|n| n.to_string_lossy().contains(&library.real_name))
                }),
        );
    }

    match library.layout {
        LibraryLayout::Recursive => {
            let lib_objects =
                compiler.compile_files_recursive(props, &library.src_folder, &build_dir, includes)?;
            if library.dot_a_linkage {
                let archive_name = format!("{}.a", library.name);
                let archive = archive_compiled_files(
                    compiler.executor(),
                    &build_dir,
                    &archive_name,
                    &lib_objects,
                    props,
                )?;
                objects.push(archive);
            } else {
                objects.extend(lib_objects);
            }
        }
        LibraryLayout::Flat => {
            let mut includes = includes.to_vec();
            if let Some(utility) = &library.utility_folder {
                includes.push(utility.clone());
            }
            objects.extend(compiler.compile_files(
                props,
                &library.src_folder,
                &build_dir,
                false,
                &includes,
            )?);
            if let Some(utility) = &library.utility_folder {
                objects.extend(compiler.compile_files(
                    props,
                    utility,
                    &build_dir.join("utility"),
                    false,
                    &includes,
                )?);
            }
        }
    }

    Ok(objects)
}

/// Linker flags for precompiled libraries: `"-L<src>/<mcu>"`, the library's
/// own `ldflags`, and `-l<name>` for every shared object found there.
pub fn precompiled_link_flags(props: &PropertySet, libraries: &[&Library]) -> BuildResult<String> {
    let mut flags = String::new();
    for library in libraries.iter().filter(|l| l.precompiled) {
        let folder = library.src_folder.join(props.mcu());
        let mut libs = format!("{} ", library.ld_flags);
        for so in files_with_extension(&folder, "so")? {
            let stem = so
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            libs.push_str(&format!("-l{} ", stem.replacen("lib", "", 1)));
        }
        flags.push_str(&format!("\"-L{}\" {}", folder.display(), libs));
    }
    Ok(flags)
}

fn files_with_extension(folder: &Path, extension: &str) -> BuildResult<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.map_err(|e| BuildError::walk(folder, e))?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|x| x == extension) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Remove `<libraries_build_dir>/<dir>` for every library that is no longer
/// imported.
pub fn remove_unused_compiled_libraries(
    libraries_build_dir: &Path,
    imported: &[&Library],
) -> BuildResult<Vec<String>> {
    let mut removed = Vec::new();
    if !libraries_build_dir.is_dir() {
        return Ok(removed);
    }
    for entry in fs::read_dir(libraries_build_dir).at(libraries_build_dir)? {
        let entry = entry.at(libraries_build_dir)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !imported.iter().any(|l| l.name == name) {
            tracing::debug!("removing unused library build folder {}", path.display());
            fs::remove_dir_all(&path).at(&path)?;
            removed.push(name);
        }
    }
    removed.sort();
    Ok(removed)
}
