//! Sketch phase.

use super::compile::Compiler;
use crate::error::{BuildResult, IoContext};
use crate::properties::PropertySet;
use std::fs;
use std::path::{Path, PathBuf};

/// Compile the saved sketch: the top of `sketch_build_dir` (merged sketch and
/// copied sources) and its `src/` tree.
pub fn build_sketch(
    compiler: &Compiler,
    props: &PropertySet,
    sketch_build_dir: &Path,
    includes: &[PathBuf],
) -> BuildResult<Vec<PathBuf>> {
    fs::create_dir_all(sketch_build_dir).at(sketch_build_dir)?;
    let mut objects =
        compiler.compile_files(props, sketch_build_dir, sketch_build_dir, false, includes)?;

    let src = sketch_build_dir.join("src");
    if src.is_dir() {
        objects.extend(compiler.compile_files(props, &src, &src, true, includes)?);
    }
    Ok(objects)
}
