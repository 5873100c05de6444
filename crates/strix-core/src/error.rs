//! Typed error hierarchy for the engine.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! for structured telemetry without string parsing.  Codes are grouped by
//! [`ErrorKind`]: 1xx configuration, 2xx shape, 3xx resource, 4xx execution,
//! 5xx consistency.

/// Coarse classification of an [`EngineError`].
///
/// Every variant belongs to exactly one kind; callers that only care about
/// the failure class match on [`EngineError::kind`] instead of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad engine configuration or API misuse (wrong device id, unbound
    /// inputs, calls against an unloaded engine).
    Config,
    /// Shape validation failures (rank mismatch, negative dims, gear
    /// rejection, resize against a static model).
    Shape,
    /// Device resource failures (allocation, context/stream lifecycle).
    Resource,
    /// Model execution failures reported by the device runtime.
    Execution,
    /// Internal bookkeeping disagreements (buffer size drift between the
    /// engine's view and the bound tensors).
    Consistency,
}

/// All errors originating from the strix engine crates.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Configuration ─────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine is not loaded — construction failed or a prior resize left it unusable")]
    NotLoaded,

    #[error("invalid device id {device_id}: runtime reports {count} device(s)")]
    InvalidDeviceId { device_id: u32, count: u32 },

    #[error("input slot `{0}` has no bound tensor")]
    MissingInput(String),

    // ── Shape ─────────────────────────────────────────────────────────
    #[error("shape error: {0}")]
    Shape(String),

    #[error("model is static and cannot be resized")]
    StaticResize,

    #[error("slot `{name}` resize to {requested} bytes exceeds advertised maximum {max}")]
    ExceedsMaxSize {
        name: String,
        requested: usize,
        max: usize,
    },

    // ── Resources ─────────────────────────────────────────────────────
    #[error("resource error: {0}")]
    Resource(String),

    #[error("device allocation of {bytes} bytes failed")]
    AllocFailed { bytes: usize },

    // ── Execution ─────────────────────────────────────────────────────
    #[error("execution error: {0}")]
    Execution(String),

    // ── Consistency ───────────────────────────────────────────────────
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

impl EngineError {
    /// Stable integer error code for structured telemetry.
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 100,
            Self::NotLoaded => 101,
            Self::InvalidDeviceId { .. } => 102,
            Self::MissingInput(_) => 103,
            Self::Shape(_) => 200,
            Self::StaticResize => 201,
            Self::ExceedsMaxSize { .. } => 202,
            Self::Resource(_) => 300,
            Self::AllocFailed { .. } => 301,
            Self::Execution(_) => 400,
            Self::Consistency(_) => 500,
            Self::SizeMismatch { .. } => 501,
        }
    }

    /// The failure class this variant belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self.error_code() {
            100..=199 => ErrorKind::Config,
            200..=299 => ErrorKind::Shape,
            300..=399 => ErrorKind::Resource,
            400..=499 => ErrorKind::Execution,
            _ => ErrorKind::Consistency,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_group_by_kind() {
        assert_eq!(EngineError::NotLoaded.kind(), ErrorKind::Config);
        assert_eq!(EngineError::StaticResize.kind(), ErrorKind::Shape);
        assert_eq!(
            EngineError::AllocFailed { bytes: 16 }.kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            EngineError::Execution("late".into()).kind(),
            ErrorKind::Execution
        );
        assert_eq!(
            EngineError::SizeMismatch {
                expected: 4,
                actual: 8
            }
            .kind(),
            ErrorKind::Consistency
        );
    }
}
