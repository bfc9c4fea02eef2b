//! Link phase.

use crate::error::BuildResult;
use crate::properties::{PropertySet, keys};
use crate::recipe::Executor;
use std::path::{Path, PathBuf};

/// Quote and space-join object paths for `{object_files}`.
pub fn object_files_list(objects: &[PathBuf]) -> String {
    objects
        .iter()
        .map(|o| format!("\"{}\"", o.display()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The property set handed to `recipe.c.combine.pattern`.
pub fn link_properties(
    props: &PropertySet,
    build_path: &Path,
    objects: &[PathBuf],
    core_archive: &Path,
    warnings_level: &str,
    extra_ld_flags: &str,
) -> PropertySet {
    let mut link_props = props.clone();

    if props.mcu() == "atmega2560" {
        let flags = format!("{},--relax", props.get_or_empty(keys::COMPILER_C_ELF_FLAGS));
        link_props.insert(keys::COMPILER_C_ELF_FLAGS, flags);
    }
    if !extra_ld_flags.is_empty() {
        let existing = props.get_or_empty(keys::COMPILER_C_ELF_EXTRA_FLAGS);
        let flags = format!("{} {}", existing, extra_ld_flags);
        link_props.insert(keys::COMPILER_C_ELF_EXTRA_FLAGS, flags.trim().to_string());
    }

    let level_key = format!("{}.{}", keys::COMPILER_WARNING_FLAGS, warnings_level);
    link_props.insert(keys::COMPILER_WARNING_FLAGS, props.get_or_empty(&level_key));

    let relative_archive = core_archive
        .strip_prefix(build_path)
        .unwrap_or(core_archive)
        .to_string_lossy()
        .to_string();
    link_props.insert(keys::ARCHIVE_FILE, relative_archive);
    link_props.insert(keys::ARCHIVE_FILE_PATH, core_archive.to_string_lossy());
    link_props.insert(keys::OBJECT_FILES, object_files_list(objects));
    link_props
}

/// Run the combine recipe over sketch, library and variant objects plus the
/// core archive.
pub fn link(
    executor: &Executor,
    props: &PropertySet,
    build_path: &Path,
    objects: &[PathBuf],
    core_archive: &Path,
    warnings_level: &str,
    extra_ld_flags: &str,
) -> BuildResult<()> {
    let link_props = link_properties(
        props,
        build_path,
        objects,
        core_archive,
        warnings_level,
        extra_ld_flags,
    );
    executor.exec(&link_props, keys::RECIPE_C_COMBINE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_properties() {
        let props: PropertySet = [
            ("build.mcu", "atmega2560"),
            ("compiler.c.elf.flags", "-Wl,--gc-sections"),
            ("compiler.c.elf.extra_flags", ""),
            ("compiler.warning_flags.none", "-w"),
        ]
        .into_iter()
        .collect();
        let objects = vec![
            PathBuf::from("/b/sketch/Blink.ino.cpp.o"),
            PathBuf::from("/b/libs/a b.o"),
        ];
        let linked = link_properties(
            &props,
            Path::new("/b"),
            &objects,
            Path::new("/b/core/core.a"),
            "none",
            "\"-L/x\" -lfoo",
        );

        assert_eq!(linked.get("compiler.c.elf.flags"), Some("-Wl,--gc-sections,--relax"));
        assert_eq!(linked.get("compiler.c.elf.extra_flags"), Some("\"-L/x\" -lfoo"));
        assert_eq!(linked.get("compiler.warning_flags"), Some("-w"));
        assert_eq!(linked.get("archive_file"), Some("core/core.a"));
        assert_eq!(linked.get("archive_file_path"), Some("/b/core/core.a"));
        assert_eq!(
            linked.get("object_files"),
            Some("\"/b/sketch/Blink.ino.cpp.o\" \"/b/libs/a b.o\"")
        );
        // Source set untouched
        assert_eq!(props.get("compiler.c.elf.flags"), Some("-Wl,--gc-sections"));
    }

    #[test]
    fn test_relax_only_for_atmega2560() {
        let props: PropertySet = [("build.mcu", "atmega328p"), ("compiler.c.elf.flags", "-Os")]
            .into_iter()
            .collect();
        let archive = Path::new("/cache/core_x.a");
        let linked = link_properties(&props, Path::new("/b"), &[], archive, "default", "");
        assert_eq!(linked.get("compiler.c.elf.flags"), Some("-Os"));
        assert_eq!(linked.get("archive_file"), Some("/cache/core_x.a"));
    }
}
