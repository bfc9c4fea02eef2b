//! Static archives and the cached core archive.

use crate::error::{BuildResult, IoContext};
use crate::properties::{PropertySet, keys};
use crate::recipe::Executor;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// File name of the cached core archive for a board and core folder.
///
/// `core_<fqbn>_<hash>.a`, where every fqbn character outside
/// `[A-Za-z0-9_.-]` becomes `_` and the hash is the first 32 hex digits of
/// the SHA-256 of the canonical core folder path.
pub fn cached_core_archive_name(fqbn: &str, core_folder: &Path) -> String {
    let normalized: String = fqbn
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let absolute = fs::canonicalize(core_folder)
        .or_else(|_| std::path::absolute(core_folder))
        .unwrap_or_else(|_| core_folder.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    format!("core_{}_{}.a", normalized, &hash[..32])
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Walk `folder` looking for a file accepted by `filter` that is newer than
/// `stamp`. Unreadable entries count as changes.
fn folder_has_newer(folder: &Path, stamp: SystemTime, filter: &dyn Fn(&Path) -> bool) -> bool {
    for entry in WalkDir::new(folder) {
        let Ok(entry) = entry else {
            return true;
        };
        if !entry.file_type().is_file() || !filter(entry.path()) {
            continue;
        }
        match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(t) if t <= stamp => {}
            _ => {
                tracing::debug!("{} is newer than the cached archive", entry.path().display());
                return true;
            }
        }
    }
    false
}

fn changed_since(
    core: &Path,
    target_core: Option<&Path>,
    stamp_file: &Path,
    filter: &dyn Fn(&Path) -> bool,
) -> bool {
    let Some(stamp) = modified(stamp_file) else {
        return true;
    };
    if folder_has_newer(core, stamp, filter) {
        return true;
    }
    match target_core {
        Some(target) if target != core => folder_has_newer(target, stamp, filter),
        _ => false,
    }
}

/// True when `archive` is missing or any file under `core` (or a distinct
/// `target_core`) is newer than it.
pub fn core_or_referenced_core_changed(
    core: &Path,
    target_core: Option<&Path>,
    archive: &Path,
) -> bool {
    changed_since(core, target_core, archive, &|_| true)
}

/// Like [`core_or_referenced_core_changed`], but only `.txt` build rule
/// files are considered.
pub fn txt_build_rules_changed(core: &Path, target_core: Option<&Path>, stamp_file: &Path) -> bool {
    changed_since(core, target_core, stamp_file, &|p| {
        p.extension().is_some_and(|e| e == "txt")
    })
}

/// Pack `objects` into `<build_dir>/<archive_name>` with `recipe.ar.pattern`.
///
/// An existing archive is reused when no object is newer than it; otherwise
/// it is removed and rebuilt by running the recipe once per object.
pub fn archive_compiled_files(
    executor: &Executor,
    build_dir: &Path,
    archive_name: &str,
    objects: &[PathBuf],
    props: &PropertySet,
) -> BuildResult<PathBuf> {
    let archive = build_dir.join(archive_name);

    if let Some(archive_time) = modified(&archive) {
        let stale = objects
            .iter()
            .any(|o| modified(o).is_none_or(|t| t > archive_time));
        if !stale {
            if executor.verbose() {
                println!("Using previously compiled file: {}", archive.display());
            }
            return Ok(archive);
        }
        fs::remove_file(&archive).at(&archive)?;
    }

    fs::create_dir_all(build_dir).at(build_dir)?;
    let mut ar_props = props.clone();
    ar_props.insert(keys::ARCHIVE_FILE, archive_name);
    ar_props.insert(keys::ARCHIVE_FILE_PATH, archive.to_string_lossy());
    for object in objects {
        ar_props.insert(keys::OBJECT_FILE, object.to_string_lossy());
        executor.exec(&ar_props, keys::RECIPE_AR)?;
    }

    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{CommandOutput, CommandRunner, RecipeCommand};
    use std::fs::File;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    /// `ar <archive> <object>`: appends the object path to the archive.
    struct FakeAr {
        calls: Mutex<usize>,
    }

    impl CommandRunner for FakeAr {
        fn run(&self, command: &RecipeCommand) -> std::io::Result<CommandOutput> {
            *self.calls.lock().unwrap() += 1;
            let mut f = File::options().create(true).append(true).open(&command.args[0])?;
            writeln!(f, "{}", command.args[1])?;
            Ok(CommandOutput {
                success: true,
                ..Default::default()
            })
        }
    }

    fn age(path: &Path, secs: u64) {
        let f = File::options().append(true).open(path).unwrap();
        f.set_modified(SystemTime::now() - Duration::from_secs(secs)).unwrap();
    }

    #[test]
    fn test_cached_name_normalizes_fqbn() {
        let dir = tempdir().unwrap();
        let name = cached_core_archive_name("arduino:avr:mega:cpu=atmega2560", dir.path());
        assert!(name.starts_with("core_arduino_avr_mega_cpu_atmega2560_"));
        assert!(name.ends_with(".a"));
        let hash = name
            .trim_start_matches("core_arduino_avr_mega_cpu_atmega2560_")
            .trim_end_matches(".a");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cached_name_depends_on_core_folder() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        assert_ne!(
            cached_core_archive_name("x:y:z", a.path()),
            cached_core_archive_name("x:y:z", b.path())
        );
        assert_eq!(
            cached_core_archive_name("x:y:z", a.path()),
            cached_core_archive_name("x:y:z", a.path())
        );
    }

    #[test]
    fn test_core_changed_detection() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        fs::create_dir_all(core.join("sub")).unwrap();
        fs::write(core.join("sub/wiring.c"), "").unwrap();
        fs::write(core.join("platform.txt"), "").unwrap();
        age(&core.join("sub/wiring.c"), 100);
        age(&core.join("platform.txt"), 100);
        let archive = dir.path().join("core.a");

        assert!(core_or_referenced_core_changed(&core, None, &archive));

        fs::write(&archive, "").unwrap();
        age(&archive, 50);
        assert!(!core_or_referenced_core_changed(&core, None, &archive));
        assert!(!txt_build_rules_changed(&core, None, &archive));

        fs::write(core.join("sub/wiring.c"), "changed").unwrap();
        assert!(core_or_referenced_core_changed(&core, None, &archive));
        assert!(!txt_build_rules_changed(&core, None, &archive));

        fs::write(core.join("platform.txt"), "changed").unwrap();
        assert!(txt_build_rules_changed(&core, None, &archive));
    }

    #[test]
    fn test_referenced_core_is_checked() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        let target = dir.path().join("target");
        fs::create_dir_all(&core).unwrap();
        fs::create_dir_all(&target).unwrap();
        let archive = dir.path().join("core.a");
        fs::write(&archive, "").unwrap();
        age(&archive, 50);
        fs::write(target.join("new.c"), "").unwrap();
        assert!(!core_or_referenced_core_changed(&core, None, &archive));
        assert!(core_or_referenced_core_changed(&core, Some(&target), &archive));
    }

    #[test]
    fn test_archive_reuse_and_rebuild() {
        let dir = tempdir().unwrap();
        let build = dir.path().join("core");
        fs::create_dir_all(&build).unwrap();
        let objects: Vec<PathBuf> = ["a.c.o", "b.cpp.o"].iter().map(|o| build.join(o)).collect();
        for o in &objects {
            fs::write(o, "").unwrap();
            age(o, 100);
        }
        let runner = Arc::new(FakeAr { calls: Mutex::new(0) });
        let executor = Executor::new(runner.clone(), false);
        let props: PropertySet = [("recipe.ar.pattern", "ar {archive_file_path} {object_file}")]
            .into_iter()
            .collect();

        let archive =
            archive_compiled_files(&executor, &build, "core.a", &objects, &props).unwrap();
        assert_eq!(archive, build.join("core.a"));
        assert_eq!(*runner.calls.lock().unwrap(), 2);
        let members: Vec<PathBuf> = fs::read_to_string(&archive)
            .unwrap()
            .lines()
            .map(PathBuf::from)
            .collect();
        assert_eq!(members, objects);

        archive_compiled_files(&executor, &build, "core.a", &objects, &props).unwrap();
        assert_eq!(*runner.calls.lock().unwrap(), 2);

        age(&archive, 50);
        fs::write(&objects[0], "newer").unwrap();
        archive_compiled_files(&executor, &build, "core.a", &objects, &props).unwrap();
        assert_eq!(*runner.calls.lock().unwrap(), 4);
        assert_eq!(fs::read_to_string(&archive).unwrap().lines().count(), 2);
    }
}
