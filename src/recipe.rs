//! Recipe execution.
//!
//! A recipe is a property whose value is a command-line template. This module
//! expands it against a [`PropertySet`], splits it into argv, and hands it to
//! a [`CommandRunner`].

use crate::error::{BuildError, BuildResult};
use crate::properties::{PropertySet, keys, strip_unexpanded};
use colored::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Command lines longer than this run from `build.path` with relative paths.
pub const COMMANDLINE_LIMIT: usize = 30000;

/// A fully expanded recipe, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeCommand {
    /// Property key the command came from (e.g. `recipe.cpp.o.pattern`)
    pub recipe: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl RecipeCommand {
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote_if_needed(&self.program));
        parts.extend(self.args.iter().map(|a| quote_if_needed(a)));
        parts.join(" ")
    }

    /// Drop every argument equal to `flag`.
    pub fn remove_arg(&mut self, flag: &str) {
        self.args.retain(|a| a != flag);
    }

    /// Value following `flag` (e.g. the path after `-o`).
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

fn quote_if_needed(s: &str) -> String {
    if s.is_empty() || s.contains(char::is_whitespace) {
        format!("\"{}\"", s)
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs prepared commands. The default is [`ProcessRunner`]; tests plug in
/// their own toolchain.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &RecipeCommand) -> std::io::Result<CommandOutput>;
}

/// Spawns real processes.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &RecipeCommand) -> std::io::Result<CommandOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        let output = cmd.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Expands recipes and runs them.
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    verbose: bool,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>, verbose: bool) -> Self {
        Self { runner, verbose }
    }

    /// Executor backed by real processes.
    pub fn system(verbose: bool) -> Self {
        Self::new(Arc::new(ProcessRunner), verbose)
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Run `recipe`; a non-zero exit becomes [`BuildError::CompilationFailed`].
    pub fn exec(&self, props: &PropertySet, recipe: &str) -> BuildResult<CommandOutput> {
        let command = prepare(props, recipe, false)?;
        self.run(&command)
    }

    /// Run an already prepared command, failing on non-zero exit.
    pub fn run(&self, command: &RecipeCommand) -> BuildResult<CommandOutput> {
        let output = self.exec_capture(command)?;
        if !output.success {
            return Err(BuildError::CompilationFailed {
                command: command.command_line(),
                output: format!("{}{}", output.stdout, output.stderr),
            });
        }
        if !output.stderr.is_empty() && self.verbose {
            eprint!("{}", output.stderr);
        }
        Ok(output)
    }

    /// Run a prepared command and return its output whatever the exit status.
    pub fn exec_capture(&self, command: &RecipeCommand) -> BuildResult<CommandOutput> {
        if self.verbose {
            println!("{}", command.command_line().dimmed());
        }
        tracing::debug!(recipe = %command.recipe, "running {}", command.command_line());
        self.runner.run(command).map_err(|e| BuildError::Spawn {
            program: command.program.clone(),
            source: e,
        })
    }
}

/// Expand `recipe` from `props` into a runnable command.
pub fn prepare(
    props: &PropertySet,
    recipe: &str,
    remove_unset: bool,
) -> BuildResult<RecipeCommand> {
    let pattern = props.require(recipe)?;

    let mut command_line = props.expand(pattern);
    if remove_unset {
        command_line = strip_unexpanded(&command_line);
    }

    let mut parts = split_command_line(&command_line)?;
    if parts.is_empty() {
        return Err(BuildError::missing_recipe(recipe));
    }

    let mut working_dir = None;
    if command_line.len() > COMMANDLINE_LIMIT
        && let Some(build_path) = props.build_path()
    {
        parts = parts
            .into_iter()
            .map(|p| relative_to(&p, &build_path))
            .collect();
        working_dir = Some(build_path);
    }

    let program = parts.remove(0);
    Ok(RecipeCommand {
        recipe: recipe.to_string(),
        program,
        args: parts,
        working_dir,
    })
}

fn relative_to(arg: &str, base: &Path) -> String {
    match Path::new(arg).strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().to_string(),
        _ => arg.to_string(),
    }
}

/// Split a command line into words, honoring `"..."`, `'...'` and
/// backslash escapes outside single quotes.
pub fn split_command_line(line: &str) -> BuildResult<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();
    let escapable = |c: char| c.is_whitespace() || c == '"' || c == '\'';

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') if matches!(chars.peek(), Some('"') | Some('\\')) => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') if chars.peek().is_some_and(|&n| escapable(n)) => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err(BuildError::InvalidCommandLine(line.to_string()));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Wrap an include folder as a quoted `-I` flag.
pub fn include_flag(folder: &Path) -> String {
    format!("\"-I{}\"", folder.display())
}

/// Join include folders into the `{includes}` value.
pub fn include_flags(folders: &[PathBuf]) -> String {
    folders
        .iter()
        .map(|f| include_flag(f))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Platform null device, used as the target of discovery preprocessing.
pub fn null_file() -> &'static str {
    if cfg!(windows) { "nul" } else { "/dev/null" }
}

/// Recipe key for a source extension (`.S`, `.c`, `.cpp`).
pub fn compile_recipe_for(extension: &str) -> Option<&'static str> {
    match extension {
        "S" => Some(keys::RECIPE_S_O),
        "c" => Some(keys::RECIPE_C_O),
        "cpp" => Some(keys::RECIPE_CPP_O),
        _ => None,
    }
}
