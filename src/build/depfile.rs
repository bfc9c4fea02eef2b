//! Make-style dependency files (`.d`) and the object staleness check.

use crate::error::{BuildError, BuildResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Target and prerequisites parsed from a `.d` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub target: PathBuf,
    pub dependencies: Vec<PathBuf>,
}

impl DependencyRecord {
    /// Parse the content of a `.d` file. Returns `None` when there is no
    /// `target:` entry to anchor the record.
    pub fn parse(content: &str) -> Option<Self> {
        let mut tokens = tokenize(content).into_iter();

        let mut target = tokens.next()?;
        if !target.ends_with(':') {
            // `obj.o : src.c`
            if tokens.next().as_deref() != Some(":") {
                return None;
            }
            target.push(':');
        }
        target.pop();
        if target.is_empty() {
            return None;
        }

        let mut dependencies: Vec<PathBuf> = Vec::new();
        for token in tokens {
            // Phony targets emitted by -MP carry a trailing colon.
            let dep = token.strip_suffix(':').unwrap_or(&token);
            if dep.is_empty() {
                continue;
            }
            let dep = PathBuf::from(dep);
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        Some(Self {
            target: PathBuf::from(target),
            dependencies,
        })
    }
}

/// Split on unescaped whitespace, folding `\`-newline continuations and
/// undoing make escapes (`\ `, `\<tab>`, `\#`, `\\`, `$$`).
fn tokenize(content: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek().copied() {
                Some('\n') => {
                    chars.next();
                    flush(&mut current, &mut tokens);
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    flush(&mut current, &mut tokens);
                }
                Some(n @ (' ' | '\t' | '#' | '\\')) => {
                    chars.next();
                    current.push(n);
                }
                _ => current.push('\\'),
            },
            '$' if chars.peek() == Some(&'$') => {
                chars.next();
                current.push('$');
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Modification time, or `None` when the file does not exist.
fn mtime(path: &Path) -> BuildResult<Option<SystemTime>> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BuildError::io(path, e)),
    }
}

/// True when `object` can be reused for `source`.
///
/// The object and its dependency file must exist and be at least as new as
/// the source, the dependency file must name `object` as its target, and
/// every prerequisite it lists must exist and be no newer than the object.
/// Anything short of that means "rebuild"; only unexpected I/O failures on
/// the object or dependency file are errors.
pub fn object_is_up_to_date(source: &Path, object: &Path, depfile: &Path) -> BuildResult<bool> {
    let Some(source_time) = mtime(source)? else {
        tracing::debug!("{} is missing, rebuilding", source.display());
        return Ok(false);
    };
    let Some(object_time) = mtime(object)? else {
        tracing::debug!("{} does not exist yet", object.display());
        return Ok(false);
    };
    let Some(depfile_time) = mtime(depfile)? else {
        tracing::debug!("{} does not exist yet", depfile.display());
        return Ok(false);
    };

    if source_time > object_time || source_time > depfile_time {
        tracing::debug!("{} is newer than its object", source.display());
        return Ok(false);
    }

    let bytes = fs::read(depfile).map_err(|e| BuildError::io(depfile, e))?;
    let content = String::from_utf8_lossy(&bytes);
    let Some(record) = DependencyRecord::parse(&content) else {
        tracing::debug!("{} has no usable target, rebuilding", depfile.display());
        return Ok(false);
    };
    if record.target.as_path() != object {
        tracing::debug!(
            "{} targets {} instead of {}",
            depfile.display(),
            record.target.display(),
            object.display()
        );
        return Ok(false);
    }

    for dep in &record.dependencies {
        match fs::metadata(dep).and_then(|m| m.modified()) {
            Ok(t) if t <= object_time => {}
            Ok(_) => {
                tracing::debug!("{} changed since last build", dep.display());
                return Ok(false);
            }
            Err(_) => {
                tracing::debug!("cannot stat {}, rebuilding", dep.display());
                return Ok(false);
            }
        }
    }

    Ok(true)
}
