//! Core domain models for the deployment pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, steps, secrets and their configuration.

pub mod config;
pub mod context;
pub mod image;
pub mod pipeline;
pub mod secrets;
pub mod stage;
pub mod state;
pub mod step;
pub mod trigger;

pub use context::*;
pub use image::ImageRef;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
