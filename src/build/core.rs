//! Core phase: the board variant and the platform core.

use super::archive::{
    archive_compiled_files, cached_core_archive_name, core_or_referenced_core_changed,
};
use super::compile::Compiler;
use crate::error::{BuildError, BuildResult, IoContext};
use crate::properties::PropertySet;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Outputs of the core phase.
#[derive(Debug, Clone)]
pub struct CoreBuild {
    /// `core.a` in the build folder, or the cached copy when it was reused
    pub archive: PathBuf,
    /// Variant objects, always linked loose
    pub variant_objects: Vec<PathBuf>,
    pub from_cache: bool,
}

/// Compile the variant, then either reuse the cached core archive or
/// compile the core into `<core_build_dir>/core.a` and refresh the cache.
pub fn build_core(
    compiler: &Compiler,
    props: &PropertySet,
    core_build_dir: &Path,
    cache_dir: Option<&Path>,
) -> BuildResult<CoreBuild> {
    let core_folder = props
        .core_path()
        .ok_or_else(|| BuildError::Config("build.core.path is not set".to_string()))?;
    let variant_folder = props.variant_path();

    fs::create_dir_all(core_build_dir).at(core_build_dir)?;
    if let Some(cache) = cache_dir {
        fs::create_dir_all(cache).at(cache)?;
    }

    let mut includes = vec![core_folder.clone()];
    includes.extend(variant_folder.clone());

    let variant_objects = match &variant_folder {
        Some(variant) => compiler.compile_files(props, variant, core_build_dir, true, &includes)?,
        None => Vec::new(),
    };

    // Any change in the platform (including platform.txt) invalidates the cache.
    let platform_folder = core_folder
        .parent()
        .and_then(Path::parent)
        .unwrap_or(&core_folder)
        .to_path_buf();
    let target_platform = props.platform_path();

    let cached_archive = cache_dir.map(|cache| {
        cache.join(cached_core_archive_name(props.fqbn(), &platform_folder))
    });

    if let Some(cached) = &cached_archive
        && !core_or_referenced_core_changed(&platform_folder, target_platform.as_deref(), cached)
    {
        if compiler.executor().verbose() {
            println!("{} Using precompiled core: {}", "→".blue(), cached.display());
        }
        tracing::debug!("core archive cache hit: {}", cached.display());
        return Ok(CoreBuild {
            archive: cached.clone(),
            variant_objects,
            from_cache: true,
        });
    }

    let core_objects =
        compiler.compile_files(props, &core_folder, core_build_dir, true, &includes)?;
    let archive = archive_compiled_files(
        compiler.executor(),
        core_build_dir,
        "core.a",
        &core_objects,
        props,
    )?;

    if let Some(cached) = &cached_archive {
        if compiler.executor().verbose() {
            println!("{} Archiving built core (caching) in: {}", "→".blue(), cached.display());
        }
        if let Err(e) = fs::copy(&archive, cached) {
            eprintln!(
                "{} Could not cache core archive at {}: {}",
                "!".yellow(),
                cached.display(),
                e
            );
        }
    }

    Ok(CoreBuild {
        archive,
        variant_objects,
        from_cache: false,
    })
}
