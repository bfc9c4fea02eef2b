//! Build orchestration.
//!
//! [`Builder::build`] runs every phase in order against explicit inputs: the
//! merged platform/board properties, the library catalog, and the sketch.
//! Nothing is shared between builds; the only mutable state during
//! discovery lives in [`Discovery`].

use crate::build::{
    self, BuildOptionsRecord, Compiler, LIBRARIES_FOLDER, PREPROC_FOLDER, SKETCH_FOLDER,
};
use crate::discovery::{Discovery, validate_imported_libraries};
use crate::error::BuildResult;
use crate::library::Library;
use crate::properties::{PropertySet, keys, os_suffix};
use crate::recipe::Executor;
use crate::sketch::Sketch;
use chrono::{DateTime, Datelike, Local, Offset, TimeZone};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Per-build settings that are not part of the property set.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub fqbn: String,
    /// Platform architecture, e.g. `avr`
    pub arch: String,
    pub build_path: PathBuf,
    /// Where cached core archives live; `None` disables the cache
    pub cache_dir: Option<PathBuf>,
    pub warnings_level: String,
    pub verbose: bool,
    pub jobs: usize,
    pub show_progress: bool,
    /// Recorded in `build.options.json`
    pub library_folders: Vec<PathBuf>,
}

impl BuildOptions {
    pub fn new(fqbn: &str, arch: &str, build_path: impl Into<PathBuf>) -> Self {
        Self {
            fqbn: fqbn.to_string(),
            arch: arch.to_string(),
            build_path: build_path.into(),
            cache_dir: None,
            warnings_level: "default".to_string(),
            verbose: false,
            jobs: default_jobs(),
            show_progress: false,
            library_folders: Vec::new(),
        }
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Clock values published as `extra.time.*`, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTime {
    /// Seconds since the epoch
    pub utc: i64,
    /// `utc` shifted into the local wall clock
    pub local: i64,
    /// Standard offset from UTC, daylight saving excluded
    pub zone: i32,
    /// Daylight saving shift currently in effect
    pub dst: i32,
}

impl BuildTime {
    pub fn now() -> Self {
        Self::at(&Local::now())
    }

    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let current = now.offset().fix().local_minus_utc();
        let tz = now.timezone();
        let offset_on = |month: u32| {
            tz.with_ymd_and_hms(now.year(), month, 1, 0, 0, 0)
                .earliest()
                .map(|t| t.offset().fix().local_minus_utc())
                .unwrap_or(current)
        };
        let (zone, dst) = split_offset(current, offset_on(1), offset_on(7));
        let utc = now.timestamp();
        Self {
            utc,
            local: utc + i64::from(current),
            zone,
            dst,
        }
    }
}

/// Standard time is whichever of January and July is further behind UTC.
fn split_offset(current: i32, january: i32, july: i32) -> (i32, i32) {
    let standard = january.min(july);
    (standard, current - standard)
}

/// Everything a build produced.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub sketch_objects: Vec<PathBuf>,
    pub library_objects: Vec<PathBuf>,
    pub variant_objects: Vec<PathBuf>,
    pub core_archive: PathBuf,
    pub core_from_cache: bool,
    /// Imported library names, in import order
    pub imported_libraries: Vec<String>,
    pub include_folders: Vec<PathBuf>,
    pub resolution_passes: usize,
    pub warnings: Vec<String>,
    pub preprocessed_sketch: Option<PathBuf>,
    /// True when stale build options forced a clean build
    pub wiped: bool,
}

pub struct Builder {
    options: BuildOptions,
    executor: Executor,
}

impl Builder {
    pub fn new(options: BuildOptions, executor: Executor) -> Self {
        Self { options, executor }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Layer the per-build properties over `base`.
    pub fn setup_properties(&self, base: &PropertySet, sketch: &Sketch) -> PropertySet {
        let mut props = base.clone();
        props.insert(keys::BUILD_PATH, self.options.build_path.to_string_lossy());
        props.insert(keys::BUILD_PROJECT_NAME, sketch.name());
        props.insert(keys::BUILD_ARCH, self.options.arch.to_uppercase());
        props.insert(keys::BUILD_FQBN, self.options.fqbn.as_str());
        props.insert(keys::BUILD_SOURCE_PATH, sketch.folder.to_string_lossy());
        if !props.contains_key(keys::RUNTIME_OS) {
            props.insert(keys::RUNTIME_OS, os_suffix());
        }

        let time = BuildTime::now();
        props.insert(keys::EXTRA_TIME_UTC, time.utc.to_string());
        props.insert(keys::EXTRA_TIME_LOCAL, time.local.to_string());
        props.insert(keys::EXTRA_TIME_ZONE, time.zone.to_string());
        props.insert(keys::EXTRA_TIME_DST, time.dst.to_string());
        props
    }

    fn options_record(&self, props: &PropertySet, sketch: &Sketch) -> BuildOptionsRecord {
        BuildOptionsRecord {
            fqbn: self.options.fqbn.clone(),
            sketch_location: sketch.main_file.path.to_string_lossy().to_string(),
            warnings_level: self.options.warnings_level.clone(),
            library_folders: self
                .options
                .library_folders
                .iter()
                .map(|f| f.to_string_lossy().to_string())
                .collect(),
            properties_digest: BuildOptionsRecord::digest_of(props),
        }
    }

    /// Run every phase: prepare the build folder, save the sketch, discover
    /// libraries, compile sketch, libraries and core, then link.
    pub fn build(
        &self,
        base: &PropertySet,
        libraries: &[Library],
        sketch: &Sketch,
    ) -> BuildResult<BuildOutput> {
        let start_time = Instant::now();
        let build_path = self.options.build_path.as_path();
        let props = self.setup_properties(base, sketch);

        // 1. Build folder housekeeping
        let record = self.options_record(&props, sketch);
        let platform_folder = props
            .core_path()
            .and_then(|core| core.parent().and_then(Path::parent).map(Path::to_path_buf));
        let target_platform = props.platform_path();
        let wiped = build::wipe_build_path_if_options_changed(
            build_path,
            &record,
            platform_folder.as_deref(),
            target_platform.as_deref(),
        )?;
        record.store(build_path)?;

        // 2. Sketch
        let sketch_dir = build_path.join(SKETCH_FOLDER);
        let merged = sketch.save(&sketch_dir)?;

        // 3. Library discovery
        println!("   {} Detecting libraries used...", "🔍".blue());
        let discovery = Discovery::new(&self.executor, &props, libraries, &self.options.arch).run(
            &merged,
            &sketch_dir,
            &build_path.join(PREPROC_FOLDER),
        )?;
        validate_imported_libraries(&discovery.imported_libraries)?;
        for lib in &discovery.imported_libraries {
            let version = if lib.version.is_empty() {
                String::new()
            } else {
                format!(" {}", lib.version)
            };
            println!("      {} {}{}", "+".green(), lib.name, version.dimmed());
        }

        let libraries_dir = build_path.join(LIBRARIES_FOLDER);
        build::remove_unused_compiled_libraries(&libraries_dir, &discovery.imported_libraries)?;

        // 4. Compile
        let compiler = Compiler::new(
            self.executor.clone(),
            self.options.jobs,
            &self.options.warnings_level,
            self.options.show_progress,
        )?;
        let includes = &discovery.include_folders;

        println!("   {} Compiling sketch...", "⚙".blue());
        let sketch_objects = build::build_sketch(&compiler, &props, &sketch_dir, includes)?;

        println!("   {} Compiling libraries...", "⚙".blue());
        let library_objects = build::build_libraries(
            &compiler,
            &props,
            &libraries_dir,
            &discovery.imported_libraries,
            includes,
        )?;

        println!("   {} Compiling core...", "⚙".blue());
        let core = build::build_core(
            &compiler,
            &props,
            &build_path.join(build::CORE_FOLDER),
            self.options.cache_dir.as_deref(),
        )?;

        // 5. Link
        println!("   {} Linking everything together...", "🔗".cyan());
        let mut objects = sketch_objects.clone();
        objects.extend(library_objects.iter().cloned());
        objects.extend(core.variant_objects.iter().cloned());
        let extra_flags = build::precompiled_link_flags(&props, &discovery.imported_libraries)?;
        build::link(
            &self.executor,
            &props,
            build_path,
            &objects,
            &core.archive,
            &self.options.warnings_level,
            &extra_flags,
        )?;

        println!(
            "{} Build finished in {:.2?}",
            "✓".green(),
            start_time.elapsed()
        );

        Ok(BuildOutput {
            sketch_objects,
            library_objects,
            variant_objects: core.variant_objects,
            core_archive: core.archive,
            core_from_cache: core.from_cache,
            imported_libraries: discovery
                .imported_libraries
                .iter()
                .map(|l| l.name.clone())
                .collect(),
            include_folders: discovery.include_folders,
            resolution_passes: discovery.resolution_passes,
            warnings: discovery.warnings,
            preprocessed_sketch: discovery.preprocessed_sketch,
            wiped,
        })
    }
}
