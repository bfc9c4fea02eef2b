//! Shared fixtures for integration tests: a fake toolchain and a scratch
//! platform/library/sketch tree.

#![allow(dead_code)]

use sketchbuild::builder::{BuildOptions, BuildOutput, Builder};
use sketchbuild::config::{CONFIG_FILE, Project};
use sketchbuild::error::BuildResult;
use sketchbuild::library::load_libraries;
use sketchbuild::recipe::{CommandOutput, CommandRunner, Executor, RecipeCommand};
use sketchbuild::sketch::Sketch;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

pub const PLATFORM_TXT: &str = "\
name=Fake AVR Boards
compiler.cpp.flags=-c -MMD
compiler.c.flags=-c -MMD
compiler.S.flags=-c -x assembler-with-cpp -MMD
preproc.macros.flags=-E
compiler.warning_flags=
compiler.warning_flags.none=-w
compiler.warning_flags.default=
compiler.warning_flags.all=-Wall -Wextra
compiler.c.elf.flags=-Os
compiler.c.elf.extra_flags=
recipe.c.o.pattern=fakecc {compiler.c.flags} -mmcu={build.mcu} {compiler.warning_flags} {includes} {source_file} -o {object_file}
recipe.cpp.o.pattern=fakecc {compiler.cpp.flags} -mmcu={build.mcu} {compiler.warning_flags} {includes} {source_file} -o {object_file}
recipe.S.o.pattern=fakecc {compiler.S.flags} -mmcu={build.mcu} {includes} {source_file} -o {object_file}
recipe.ar.pattern=fakear rcs {archive_file_path} {object_file}
recipe.c.combine.pattern=fakeld {compiler.c.elf.flags} -mmcu={build.mcu} -o {build.path}/{build.project_name}.elf {object_files} {archive_file_path} {compiler.c.elf.extra_flags}
";

pub const BOARDS_TXT: &str = "\
uno.name=Arduino Uno
uno.build.mcu=atmega328p
uno.build.core=arduino
uno.build.variant=standard
";

pub const SKETCH_TOML: &str = r#"
[project]
sketch = "Blink"
fqbn = "arduino:avr:uno"

[platform]
properties = ["hardware/avr/platform.txt"]
boards = "hardware/avr/boards.txt"
board = "uno"

[libraries]
folders = ["libraries"]

[build]
cache_dir = "cache"
"#;

/// Fake `fakecc`/`fakear`/`fakeld` tools.
///
/// `fakecc -E` behaves like a preprocessor: it follows `#include` lines
/// through the source's folder (quoted includes only) and the `-I` folders,
/// and fails with a gcc style "No such file or directory" diagnostic on the
/// first header it cannot find. Without `-E` it writes the object and a
/// make style dependency file listing every header reached.
pub struct FakeToolchain {
    calls: Mutex<Vec<RecipeCommand>>,
    max_delay_ms: u64,
    seed: AtomicU64,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::with_random_delays(0)
    }

    /// Sleep up to `max_delay_ms` before each command.
    pub fn with_random_delays(max_delay_ms: u64) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(7);
        Self {
            calls: Mutex::new(Vec::new()),
            max_delay_ms,
            seed: AtomicU64::new(seed),
        }
    }

    pub fn calls(&self) -> Vec<RecipeCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Sources handed to the compiler (not the preprocessor), in call order.
    pub fn compiled_sources(&self) -> Vec<PathBuf> {
        self.calls()
            .iter()
            .filter(|c| c.program == "fakecc" && !is_preprocess(c))
            .filter_map(source_of)
            .collect()
    }

    pub fn preprocess_count(&self) -> usize {
        self.calls().iter().filter(|c| is_preprocess(c)).count()
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls().iter().filter(|c| c.program == program).count()
    }

    fn pause(&self) {
        if self.max_delay_ms == 0 {
            return;
        }
        let mut x = self.seed.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
        x ^= x >> 33;
        x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
        x ^= x >> 33;
        thread::sleep(Duration::from_millis(x % (self.max_delay_ms + 1)));
    }
}

impl CommandRunner for FakeToolchain {
    fn run(&self, command: &RecipeCommand) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        self.pause();
        match command.program.as_str() {
            "fakecc" if is_preprocess(command) => preprocess(command),
            "fakecc" => compile(command),
            "fakear" => archive(command),
            "fakeld" => link(command),
            other => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown tool {}", other),
            )),
        }
    }
}

fn is_preprocess(command: &RecipeCommand) -> bool {
    command.args.iter().any(|a| a == "-E")
}

fn source_of(command: &RecipeCommand) -> Option<PathBuf> {
    let pos = command.args.iter().position(|a| a == "-o")?;
    pos.checked_sub(1).map(|i| PathBuf::from(&command.args[i]))
}

fn output_of(command: &RecipeCommand) -> Option<PathBuf> {
    command.arg_after("-o").map(PathBuf::from)
}

fn include_dirs(command: &RecipeCommand) -> Vec<PathBuf> {
    command
        .args
        .iter()
        .filter_map(|a| a.strip_prefix("-I"))
        .map(PathBuf::from)
        .collect()
}

struct MissingHeader {
    file: PathBuf,
    header: String,
}

impl MissingHeader {
    fn into_output(self) -> CommandOutput {
        CommandOutput {
            success: false,
            stdout: String::new(),
            stderr: format!(
                "{}:1:10: fatal error: {}: No such file or directory\n #include <{}>\n          ^\ncompilation terminated.\n",
                self.file.display(),
                self.header,
                self.header
            ),
        }
    }
}

fn parse_include(line: &str) -> Option<(String, bool)> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?.trim();
    if let Some(r) = rest.strip_prefix('<') {
        return r.find('>').map(|end| (r[..end].to_string(), false));
    }
    if let Some(r) = rest.strip_prefix('"') {
        return r.find('"').map(|end| (r[..end].to_string(), true));
    }
    None
}

/// Every header reachable from `file`, in first-seen order.
fn walk_includes(
    file: &Path,
    dirs: &[PathBuf],
    seen: &mut Vec<PathBuf>,
) -> Result<(), MissingHeader> {
    let text = fs::read_to_string(file).unwrap_or_default();
    for line in text.lines() {
        let Some((header, quoted)) = parse_include(line) else {
            continue;
        };
        let local = if quoted {
            file.parent().map(|p| p.join(&header)).filter(|p| p.is_file())
        } else {
            None
        };
        let found = local.or_else(|| dirs.iter().map(|d| d.join(&header)).find(|p| p.is_file()));
        match found {
            Some(path) => {
                if !seen.contains(&path) {
                    seen.push(path.clone());
                    walk_includes(&path, dirs, seen)?;
                }
            }
            None => {
                return Err(MissingHeader {
                    file: file.to_path_buf(),
                    header,
                });
            }
        }
    }
    Ok(())
}

fn ok() -> CommandOutput {
    CommandOutput {
        success: true,
        ..Default::default()
    }
}

fn preprocess(command: &RecipeCommand) -> io::Result<CommandOutput> {
    let source = source_of(command).ok_or_else(|| io::Error::other("no source"))?;
    let mut headers = Vec::new();
    if let Err(missing) = walk_includes(&source, &include_dirs(command), &mut headers) {
        return Ok(missing.into_output());
    }
    if let Some(out) = output_of(command)
        && out != Path::new(sketchbuild::recipe::null_file())
    {
        let mut text = String::new();
        for header in &headers {
            text.push_str(&fs::read_to_string(header)?);
        }
        text.push_str(&fs::read_to_string(&source)?);
        fs::write(out, text)?;
    }
    Ok(ok())
}

fn compile(command: &RecipeCommand) -> io::Result<CommandOutput> {
    let source = source_of(command).ok_or_else(|| io::Error::other("no source"))?;
    let object = output_of(command).ok_or_else(|| io::Error::other("no output"))?;
    let mut headers = Vec::new();
    if let Err(missing) = walk_includes(&source, &include_dirs(command), &mut headers) {
        return Ok(missing.into_output());
    }
    fs::write(&object, format!("obj {}", source.display()))?;
    let mut dep = format!("{}: {}", object.display(), source.display());
    for header in &headers {
        dep.push_str(&format!(" \\\n  {}", header.display()));
    }
    dep.push('\n');
    fs::write(object.with_extension("d"), dep)?;
    Ok(ok())
}

fn archive(command: &RecipeCommand) -> io::Result<CommandOutput> {
    let archive = command.args.get(1).ok_or_else(|| io::Error::other("no archive"))?;
    let object = command.args.get(2).ok_or_else(|| io::Error::other("no object"))?;
    let mut file = File::options().create(true).append(true).open(archive)?;
    writeln!(file, "{}", object)?;
    Ok(ok())
}

fn link(command: &RecipeCommand) -> io::Result<CommandOutput> {
    let out = output_of(command).ok_or_else(|| io::Error::other("no output"))?;
    fs::write(out, "elf")?;
    Ok(ok())
}

/// Scratch tree with a fake AVR platform, a `libraries/` folder and a
/// `Blink` sketch.
pub struct Fixture {
    pub dir: TempDir,
    pub toolchain: Arc<FakeToolchain>,
}

impl Fixture {
    pub fn new(sketch: &str) -> Self {
        Self::with_toolchain(sketch, FakeToolchain::new())
    }

    pub fn with_toolchain(sketch: &str, toolchain: FakeToolchain) -> Self {
        let fixture = Self {
            dir: tempfile::tempdir().unwrap(),
            toolchain: Arc::new(toolchain),
        };
        fixture.write("hardware/avr/platform.txt", PLATFORM_TXT);
        fixture.write("hardware/avr/boards.txt", BOARDS_TXT);
        fixture.write(
            "hardware/avr/cores/arduino/Arduino.h",
            "#include \"pins_arduino.h\"\nvoid setup();\nvoid loop();\n",
        );
        fixture.write(
            "hardware/avr/cores/arduino/main.cpp",
            "#include <Arduino.h>\nint main() {}\n",
        );
        fixture.write("hardware/avr/cores/arduino/wiring.c", "#include \"Arduino.h\"\n");
        fixture.write("hardware/avr/variants/standard/pins_arduino.h", "#define LED 13\n");
        fixture.write("Blink/Blink.ino", sketch);
        fixture.write(CONFIG_FILE, SKETCH_TOML);
        fs::create_dir_all(fixture.path("libraries")).unwrap();
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// `libraries/<folder>` with a complete `library.properties` and `files`.
    pub fn add_library(&self, folder: &str, architectures: &str, files: &[(&str, &str)]) {
        self.write(
            &format!("libraries/{}/library.properties", folder),
            &format!(
                "name={folder}\nversion=1.0.0\nauthor=Someone\nmaintainer=Someone\n\
                 sentence=A library\nparagraph=More\nurl=http://example.com\narchitectures={architectures}\n"
            ),
        );
        for (rel, content) in files {
            self.write(&format!("libraries/{}/{}", folder, rel), content);
        }
    }

    /// The standard `Wire` library: a header, its implementation and a
    /// `utility/` helper referenced by relative path.
    pub fn add_wire(&self) {
        self.add_library(
            "Wire",
            "avr",
            &[
                ("src/Wire.h", "#include <Arduino.h>\nclass TwoWire {};\n"),
                ("src/Wire.cpp", "#include \"Wire.h\"\n#include \"utility/twi.h\"\n"),
                ("src/utility/twi.h", "void twi_init();\n"),
                ("src/utility/twi.c", "#include \"twi.h\"\n"),
            ],
        );
    }

    pub fn build_path(&self) -> PathBuf {
        self.path("build")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path("cache")
    }

    pub fn build(&self) -> BuildResult<BuildOutput> {
        self.build_with(|_| {})
    }

    pub fn build_with(
        &self,
        configure: impl FnOnce(&mut BuildOptions),
    ) -> BuildResult<BuildOutput> {
        let project = Project::load(&self.path(CONFIG_FILE))?;
        let base = project.build_properties()?;
        let sketch = Sketch::load(&project.sketch_path())?;
        let libraries = load_libraries(&project.library_folders())?;

        let mut options = BuildOptions::new(project.fqbn(), &project.arch(), project.build_path());
        options.cache_dir = project.cache_dir();
        options.library_folders = project.library_folders();
        options.jobs = 4;
        configure(&mut options);

        let executor = Executor::new(self.toolchain.clone(), false);
        Builder::new(options, executor).build(&base, &libraries, &sketch)
    }
}

/// Set the modification time of `path` relative to now.
pub fn set_mtime(path: &Path, offset_secs: i64) {
    let now = SystemTime::now();
    let time = if offset_secs >= 0 {
        now + Duration::from_secs(offset_secs as u64)
    } else {
        now - Duration::from_secs(offset_secs.unsigned_abs())
    };
    File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
}
