//! Core archive cache management.
//!
//! Compiled platform cores are kept in `~/.sketchbuild/cache/cores` (or the
//! folder configured in `sketch.toml`) so that sketches for the same board
//! can skip recompiling the core.
//!
//! ## Commands
//!
//! - `sb cache path` - Print cache directory location
//! - `sb cache list` - List cached core archives
//! - `sb cache clean` - Remove every cached archive
//! - `sb cache prune` - Remove archives not used by this project

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

/// `~/.sketchbuild/cache/cores`
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sketchbuild").join("cache").join("cores"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArchive {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Cached `core_*.a` archives, sorted by name.
pub fn list_archives(cache_dir: &Path) -> Result<Vec<CachedArchive>> {
    if !cache_dir.exists() {
        return Ok(Vec::new());
    }
    let mut archives = Vec::new();
    for entry in fs::read_dir(cache_dir)
        .with_context(|| format!("Failed to read cache directory {}", cache_dir.display()))?
        .flatten()
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.starts_with("core_") && name.ends_with(".a")) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        archives.push(CachedArchive {
            name,
            path: entry.path(),
            size,
        });
    }
    archives.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(archives)
}

pub fn print_path(cache_dir: &Path) -> Result<()> {
    println!("{}", cache_dir.display());
    Ok(())
}

pub fn list(cache_dir: &Path) -> Result<()> {
    let archives = list_archives(cache_dir)?;
    if archives.is_empty() {
        println!("{} Cache is empty.", "ℹ".blue());
        return Ok(());
    }
    for archive in &archives {
        println!(
            "   {} {} {}",
            "•".cyan(),
            archive.name,
            format!("({} KB)", archive.size.div_ceil(1024)).dimmed()
        );
    }
    println!("{} {} cached core(s)", "✓".green(), archives.len());
    Ok(())
}

pub fn clean(cache_dir: &Path) -> Result<()> {
    if cache_dir.exists() {
        println!("{} Cleaning cache...", "🧹".yellow());
        fs::remove_dir_all(cache_dir).context("Failed to remove core cache")?;
        fs::create_dir_all(cache_dir)?;
        println!("{} Cache cleaned.", "✓".green());
    } else {
        println!("{} Cache already empty.", "✓".green());
    }
    Ok(())
}

/// Remove cached archives whose name is not in `keep`. Returns how many were
/// removed.
pub fn prune_unused(cache_dir: &Path, keep: &[String]) -> Result<usize> {
    let mut removed_count = 0;
    for archive in list_archives(cache_dir)? {
        if keep.contains(&archive.name) {
            continue;
        }
        println!("   {} Removing unused: {}", "🗑️".red(), archive.name);
        if let Err(e) = fs::remove_file(&archive.path) {
            println!("     Error removing {}: {}", archive.name, e);
        } else {
            removed_count += 1;
        }
    }

    if removed_count == 0 {
        println!("{} All cached cores are in use.", "✓".green());
    } else {
        println!("{} Removed {} unused cores.", "✓".green(), removed_count);
    }
    Ok(removed_count)
}
