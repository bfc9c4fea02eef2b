//! Sketch loading and merging.
//!
//! A sketch is a folder holding `<folder>.ino` plus optional extra `.ino`
//! files and plain C/C++/assembly sources (at the top level or under
//! `src/`). The `.ino` files are concatenated into one `<main>.ino.cpp`
//! translation unit, with `#line` directives pointing back at the originals.

use crate::error::{BuildError, BuildResult, IoContext};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

const SKETCH_EXTENSIONS: [&str; 2] = ["ino", "pde"];
const ADDITIONAL_EXTENSIONS: [&str; 7] = ["c", "cpp", "h", "hh", "hpp", "S", "tpp"];

static ARDUINO_H: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*#\s*include\s*[<"]Arduino\.h[>"]"#).expect("Arduino.h include regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SketchFile {
    pub path: PathBuf,
    pub source: String,
}

impl SketchFile {
    fn read(path: &Path) -> BuildResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            source: fs::read_to_string(path).at(path)?,
        })
    }

    fn with_line_directive(&self) -> String {
        let name = self.path.to_string_lossy().replace('\\', "\\\\");
        format!("#line 1 \"{}\"\n{}\n", name, self.source)
    }
}

#[derive(Debug, Clone)]
pub struct Sketch {
    pub folder: PathBuf,
    pub main_file: SketchFile,
    /// Other `.ino` files, sorted by name
    pub other_sketch_files: Vec<SketchFile>,
    /// Plain sources and headers, relative paths preserved on save
    pub additional_files: Vec<PathBuf>,
}

impl Sketch {
    /// Load a sketch from its folder or its main `.ino` file.
    pub fn load(location: &Path) -> BuildResult<Self> {
        let (folder, main_path) = if location.is_dir() {
            let name = location
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let main = SKETCH_EXTENSIONS
                .iter()
                .map(|ext| location.join(format!("{}.{}", name, ext)))
                .find(|p| p.is_file())
                .ok_or_else(|| {
                    BuildError::Config(format!("no {}.ino found in {}", name, location.display()))
                })?;
            (location.to_path_buf(), main)
        } else if location.is_file() {
            let folder = location.parent().unwrap_or(Path::new(".")).to_path_buf();
            (folder, location.to_path_buf())
        } else {
            return Err(BuildError::Config(format!(
                "sketch not found: {}",
                location.display()
            )));
        };

        let main_file = SketchFile::read(&main_path)?;

        let mut other_sketch_files = Vec::new();
        let mut additional_files = Vec::new();
        for entry in WalkDir::new(&folder)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || (!e.file_name().to_string_lossy().starts_with('.')
                        && (e.depth() > 1 || !e.file_type().is_dir() || e.file_name() == "src"))
            })
        {
            let entry = entry.map_err(|e| BuildError::walk(&folder, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path.extension().and_then(|x| x.to_str()).unwrap_or_default();
            if entry.depth() == 1 && SKETCH_EXTENSIONS.contains(&ext) {
                if path != main_path {
                    other_sketch_files.push(SketchFile::read(path)?);
                }
            } else if ADDITIONAL_EXTENSIONS.contains(&ext) {
                additional_files.push(path.to_path_buf());
            }
        }

        Ok(Self {
            folder,
            main_file,
            other_sketch_files,
            additional_files,
        })
    }

    /// Main file name, e.g. `Blink.ino`.
    pub fn name(&self) -> String {
        self.main_file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// File name of the merged translation unit, e.g. `Blink.ino.cpp`.
    pub fn merged_file_name(&self) -> String {
        format!("{}.cpp", self.name())
    }

    pub fn merged_source(&self) -> String {
        let mut source = String::new();
        if !ARDUINO_H.is_match(&self.main_file.source) {
            source.push_str("#include <Arduino.h>\n");
        }
        source.push_str(&self.main_file.with_line_directive());
        for file in &self.other_sketch_files {
            source.push_str(&file.with_line_directive());
        }
        source
    }

    /// Write the merged source and copy additional files into
    /// `sketch_build_dir`. Files whose content is unchanged are left alone so
    /// their timestamps keep incremental builds incremental. Returns the
    /// merged file path.
    pub fn save(&self, sketch_build_dir: &Path) -> BuildResult<PathBuf> {
        fs::create_dir_all(sketch_build_dir).at(sketch_build_dir)?;

        let merged = sketch_build_dir.join(self.merged_file_name());
        write_if_changed(&merged, self.merged_source().as_bytes())?;

        for file in &self.additional_files {
            let rel = file.strip_prefix(&self.folder).unwrap_or(file);
            let target = sketch_build_dir.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            let content = fs::read(file).at(file)?;
            write_if_changed(&target, &content)?;
        }
        Ok(merged)
    }
}

fn write_if_changed(path: &Path, content: &[u8]) -> BuildResult<()> {
    if fs::read(path).is_ok_and(|existing| existing == content) {
        return Ok(());
    }
    fs::write(path, content).at(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_and_merge() {
        let dir = tempdir().unwrap();
        let sketch_dir = dir.path().join("Blink");
        write(&sketch_dir.join("Blink.ino"), "void setup() {}\nvoid loop() {}");
        write(&sketch_dir.join("b_tab.ino"), "int helper() { return 1; }");
        write(&sketch_dir.join("util.h"), "#pragma once");
        write(&sketch_dir.join("src/extra/x.cpp"), "");
        write(&sketch_dir.join("data/ignored.cpp"), "");
        write(&sketch_dir.join(".git/HEAD.c"), "");

        let sketch = Sketch::load(&sketch_dir).unwrap();
        assert_eq!(sketch.name(), "Blink.ino");
        assert_eq!(sketch.other_sketch_files.len(), 1);
        assert_eq!(
            sketch.additional_files,
            vec![sketch_dir.join("src/extra/x.cpp"), sketch_dir.join("util.h")]
        );

        let merged = sketch.merged_source();
        assert!(merged.starts_with("#include <Arduino.h>\n#line 1 \""));
        assert!(merged.contains("void loop() {}"));
        let main_pos = merged.find("void setup").unwrap();
        let tab_pos = merged.find("int helper").unwrap();
        assert!(main_pos < tab_pos);
    }

    #[test]
    fn test_no_duplicate_arduino_include() {
        let dir = tempdir().unwrap();
        let sketch_dir = dir.path().join("S");
        write(&sketch_dir.join("S.ino"), "#include <Arduino.h>\nvoid setup() {}");
        let sketch = Sketch::load(&sketch_dir.join("S.ino")).unwrap();
        assert!(sketch.merged_source().starts_with("#line 1"));
    }

    #[test]
    fn test_missing_main_file() {
        let dir = tempdir().unwrap();
        let sketch_dir = dir.path().join("Empty");
        fs::create_dir_all(&sketch_dir).unwrap();
        assert!(matches!(Sketch::load(&sketch_dir), Err(BuildError::Config(_))));
    }

    #[test]
    fn test_save_writes_merged_and_additional_files() {
        let dir = tempdir().unwrap();
        let sketch_dir = dir.path().join("Blink");
        write(&sketch_dir.join("Blink.ino"), "void setup() {}");
        write(&sketch_dir.join("src/lib/x.cpp"), "int x;");
        let sketch = Sketch::load(&sketch_dir).unwrap();

        let out = dir.path().join("build/sketch");
        let merged = sketch.save(&out).unwrap();
        assert_eq!(merged, out.join("Blink.ino.cpp"));
        assert!(fs::read_to_string(&merged).unwrap().contains("void setup() {}"));
        assert_eq!(fs::read_to_string(out.join("src/lib/x.cpp")).unwrap(), "int x;");

        let before = fs::metadata(&merged).unwrap().modified().unwrap();
        sketch.save(&out).unwrap();
        assert_eq!(fs::metadata(&merged).unwrap().modified().unwrap(), before);
    }
}
