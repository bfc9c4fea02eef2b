//! # sketchbuild - Incremental firmware sketch builder
//!
//! sketchbuild turns a sketch, a platform description and a set of library
//! folders into a linked firmware image by running the platform's command
//! recipes.
//!
//! ## Features
//!
//! - **Layered Properties**: platform, board and project settings merged into one set
//! - **Library Discovery**: iterative preprocessing finds the libraries a sketch needs
//! - **Incremental Builds**: dependency files decide what to recompile
//! - **Core Cache**: compiled cores are shared between sketches for the same board
//! - **Parallel Builds**: bounded worker pool with deterministic output order
//!
//! ## Quick Start
//!
//! ```bash
//! # Build the project described by ./sketch.toml
//! sb build
//!
//! # Inspect a resolved recipe
//! sb properties recipe.cpp.o.pattern
//! ```
//!
//! ## Module Organization
//!
//! - [`properties`] - Property sets and `{key}` expansion
//! - [`recipe`] - Recipe expansion and command execution
//! - [`discovery`] - Include/library discovery loop
//! - [`library`] - Library catalog and header resolution
//! - [`build`] - Compile, archive and link phases
//! - [`builder`] - Phase orchestration

/// Compile, archive and link phases.
pub mod build;

/// Build orchestration across all phases.
pub mod builder;

/// Core archive cache management.
pub mod cache;

/// Project configuration (`sketch.toml`).
pub mod config;

/// Include/library discovery loop.
pub mod discovery;

/// Error types shared by the library.
pub mod error;

/// Library catalog and resolver.
pub mod library;

/// Property sets and placeholder expansion.
pub mod properties;

/// Recipe expansion and command execution.
pub mod recipe;

/// Sketch loading and merging.
pub mod sketch;
