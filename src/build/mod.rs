//! Build phases.
//!
//! Each phase takes the build properties and a [`compile::Compiler`] and
//! writes its outputs below the build folder:
//!
//! - `sketch/`     merged sketch and copied sources, with their objects
//! - `libraries/`  one folder per imported library
//! - `core/`       variant objects and `core.a`
//! - `preproc/`    the preprocessed sketch

pub mod archive;
pub mod clean;
pub mod compile;
pub mod core;
pub mod depfile;
pub mod libraries;
pub mod link;
pub mod sketch;

pub use archive::{
    archive_compiled_files, cached_core_archive_name, core_or_referenced_core_changed,
    txt_build_rules_changed,
};
pub use clean::{BuildOptionsRecord, clean, wipe_build_path_if_options_changed};
pub use compile::{Compiler, TranslationUnit};
pub use self::core::{CoreBuild, build_core};
pub use depfile::{DependencyRecord, object_is_up_to_date};
pub use libraries::{build_libraries, precompiled_link_flags, remove_unused_compiled_libraries};
pub use link::link;
pub use sketch::build_sketch;

pub const SKETCH_FOLDER: &str = "sketch";
pub const LIBRARIES_FOLDER: &str = "libraries";
pub const CORE_FOLDER: &str = "core";
pub const PREPROC_FOLDER: &str = "preproc";
