#![doc = include_str!("../README.md")]

pub mod config;
pub mod dyn_shape;
pub mod engine;
mod guards;

pub use config::{EngineConfig, ModelSource};
pub use dyn_shape::ShapeGearValidator;
pub use engine::{GearKind, InferenceEngine, ShapeMode};
