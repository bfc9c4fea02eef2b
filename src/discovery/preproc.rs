//! Preprocessor runs used to find missing headers.

use crate::error::{BuildError, BuildResult, IoContext};
use crate::properties::{PropertySet, keys};
use crate::recipe::{self, Executor, RecipeCommand};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Preprocessed sketch written once discovery settles.
pub const CTAGS_TARGET: &str = "ctags_target_for_gcc_minus_e.cpp";

static FATAL_MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"fatal error:\s*(.+?):\s*No such file or directory").expect("missing header regex")
});
static CANNOT_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)cannot open include file:\s*'([^']+)'").expect("cannot open regex")
});
static INCLUDE_ECHO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*#\s*include\s*[<"]([^>"]+)[>"]"#).expect("include echo regex")
});

/// Derive a preprocessing recipe from the C++ compile recipe.
pub fn preproc_pattern_from_compile(compile_pattern: &str) -> String {
    compile_pattern
        .replacen("{compiler.cpp.flags}", "{compiler.cpp.flags} {preproc.macros.flags}", 1)
        .replacen("{object_file}", "{preprocessed_file_path}", 1)
}

/// Build the preprocessor command for `source`, writing to `target`.
pub fn prepare_preprocess(
    props: &PropertySet,
    source: &Path,
    target: &Path,
    includes: &[PathBuf],
) -> BuildResult<RecipeCommand> {
    let mut pp_props = props.clone();
    pp_props.insert(keys::SOURCE_FILE, source.to_string_lossy());
    pp_props.insert(keys::PREPROCESSED_FILE_PATH, target.to_string_lossy());
    pp_props.insert(keys::INCLUDES, recipe::include_flags(includes));

    if pp_props.get_or_empty(keys::RECIPE_PREPROC_MACROS).is_empty() {
        let compile = pp_props.require(keys::RECIPE_CPP_O)?.to_string();
        pp_props.insert(keys::RECIPE_PREPROC_MACROS, preproc_pattern_from_compile(&compile));
    }

    let mut command = recipe::prepare(&pp_props, keys::RECIPE_PREPROC_MACROS, true)?;
    command.remove_arg("-MMD");
    Ok(command)
}

/// Headers the preprocessor could not find, in order of appearance.
///
/// Compiler diagnostics are authoritative; the echoed `#include` line is only
/// used when no diagnostic names the header.
pub fn extract_missing_headers(output: &str) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();

    for caps in FATAL_MISSING.captures_iter(output) {
        push_header(&mut headers, &caps[1]);
    }
    for caps in CANNOT_OPEN.captures_iter(output) {
        push_header(&mut headers, &caps[1]);
    }
    if headers.is_empty() && (output.contains("fatal error") || output.contains("No such file")) {
        for caps in INCLUDE_ECHO.captures_iter(output) {
            push_header(&mut headers, &caps[1]);
        }
    }
    headers
}

fn push_header(headers: &mut Vec<String>, raw: &str) {
    let h = raw.trim().trim_matches(|c| c == '<' || c == '>' || c == '"' || c == '\'');
    if !h.is_empty() && !headers.iter().any(|x| x == h) {
        headers.push(h.to_string());
    }
}

/// Preprocess `source` to the null device and report missing headers.
///
/// A failed run that names no missing header is a real error.
pub fn find_missing_headers(
    executor: &Executor,
    props: &PropertySet,
    source: &Path,
    includes: &[PathBuf],
) -> BuildResult<Vec<String>> {
    let command = prepare_preprocess(props, source, Path::new(recipe::null_file()), includes)?;
    let output = executor.exec_capture(&command)?;
    let headers = extract_missing_headers(&output.stderr);
    if !output.success && headers.is_empty() {
        return Err(BuildError::CompilationFailed {
            command: command.command_line(),
            output: format!("{}{}", output.stdout, output.stderr),
        });
    }
    Ok(headers)
}

/// Preprocess `source` into `target`, failing on any preprocessor error.
pub fn preprocess_to(
    executor: &Executor,
    props: &PropertySet,
    source: &Path,
    target: &Path,
    includes: &[PathBuf],
) -> BuildResult<()> {
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).at(parent)?;
    }
    let command = prepare_preprocess(props, source, target, includes)?;
    executor.run(&command)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_gcc_diagnostic() {
        let out = "/tmp/sketch/sketch.ino:1:17: fatal error: SPI.h: No such file or directory\n\
                   #include <SPI.h>\n\
                   ^\n\
                   compilation terminated.";
        assert_eq!(extract_missing_headers(out), vec!["SPI.h"]);
    }

    #[test]
    fn test_extract_nested_path_and_msvc() {
        let out = "x.cpp:3:10: fatal error: avr/pgmspace.h: No such file or directory\n\
                   y.cpp(2): fatal error C1083: Cannot open include file: 'Servo.h': No such file or directory";
        assert_eq!(extract_missing_headers(out), vec!["avr/pgmspace.h", "Servo.h"]);
    }

    #[test]
    fn test_extract_include_echo_fallback() {
        let out = "error: No such file\n  #include \"Wire.h\"\n";
        assert_eq!(extract_missing_headers(out), vec!["Wire.h"]);
    }

    #[test]
    fn test_extract_deduplicates_and_skips_echo_when_diagnosed() {
        let out = "a.cpp:1:10: fatal error: <Wire.h>: No such file or directory\n\
                   a.cpp(1): fatal error C1083: Cannot open include file: 'Wire.h': No such file or directory\n\
                   #include <Other.h>\n";
        assert_eq!(extract_missing_headers(out), vec!["Wire.h"]);
    }

    #[test]
    fn test_extract_empty_and_unrelated() {
        assert!(extract_missing_headers("").is_empty());
        let unrelated = "warning: unused variable 'x'\n#include <Arduino.h>";
        assert!(extract_missing_headers(unrelated).is_empty());
    }

    #[test]
    fn test_pattern_from_compile() {
        let p = preproc_pattern_from_compile(
            "g++ -c {compiler.cpp.flags} {includes} {source_file} -o {object_file}",
        );
        assert_eq!(
            p,
            "g++ -c {compiler.cpp.flags} {preproc.macros.flags} {includes} {source_file} -o {preprocessed_file_path}"
        );
    }

    #[test]
    fn test_prepare_preprocess_strips_unset_and_mmd() {
        let props: PropertySet = [
            (
                "recipe.cpp.o.pattern",
                "g++ -c {compiler.cpp.flags} -MMD {includes} {source_file} -o {object_file}",
            ),
            ("compiler.cpp.flags", "-Os"),
        ]
        .into_iter()
        .collect();
        let cmd = prepare_preprocess(
            &props,
            Path::new("/s/a.cpp"),
            Path::new("/dev/null"),
            &[PathBuf::from("/core")],
        )
        .unwrap();
        assert_eq!(cmd.program, "g++");
        assert_eq!(cmd.args, vec!["-c", "-Os", "-I/core", "/s/a.cpp", "-o", "/dev/null"]);
    }

    #[test]
    fn test_prepare_preprocess_prefers_explicit_recipe() {
        let props: PropertySet = [
            ("recipe.cpp.o.pattern", "g++ -c {source_file} -o {object_file}"),
            ("recipe.preproc.macros", "cpp -E {source_file} -o {preprocessed_file_path}"),
        ]
        .into_iter()
        .collect();
        let cmd =
            prepare_preprocess(&props, Path::new("a.cpp"), Path::new("out.cpp"), &[]).unwrap();
        assert_eq!(cmd.program, "cpp");
        assert_eq!(cmd.args, vec!["-E", "a.cpp", "-o", "out.cpp"]);
    }
}
