#![doc = include_str!("../README.md")]

pub mod host;
pub mod manifest;

pub use host::HostRuntime;
pub use manifest::{ModelManifest, SlotManifest};
