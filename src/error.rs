//! Errors for malformed inputs at the crate boundary.
//!
//! Statistical failures (a trajectory family that cannot explain the tree) are
//! never errors: they are reported as zero particle weights or a `-inf`
//! log-likelihood. Only precondition violations end up here.

use thiserror::Error;

/// Crate-wide result alias.
pub type EpiResult<T> = Result<T, EpiError>;

/// Precondition violations detected while building models, event lists,
/// samplers or simulators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EpiError {
    /// A rate value is negative or not finite.
    #[error("rate `{name}` has invalid value {value} (must be finite and >= 0)")]
    InvalidRate { name: &'static str, value: f64 },

    /// A probability lies outside [0, 1].
    #[error("probability `{name}` has invalid value {value} (must lie in [0, 1])")]
    InvalidProbability { name: &'static str, value: f64 },

    /// A piecewise-constant parameter has the wrong number of change times.
    #[error("parameter `{name}` has {values} values but {change_times} change times (expected {expected})")]
    ChangeTimeMismatch {
        name: &'static str,
        values: usize,
        change_times: usize,
        expected: usize,
    },

    /// Change or sampling times are not sorted or are negative.
    #[error("times for `{name}` must be non-negative and increasing")]
    UnsortedTimes { name: &'static str },

    /// A time value is NaN or infinite.
    #[error("non-finite time {time} at tree event {index}")]
    NonFiniteTime { index: usize, time: f64 },

    /// Tree events are not ordered by time.
    #[error("tree event {index} at time {time} precedes previous event at time {previous}")]
    NonMonotonicTreeEvents {
        index: usize,
        time: f64,
        previous: f64,
    },

    /// A tree event carries multiplicity zero.
    #[error("tree event {index} has zero multiplicity")]
    ZeroMultiplicity { index: usize },

    /// The tree event list is empty.
    #[error("tree event list is empty")]
    EmptyTreeEvents,

    /// The particle filter was configured with no particles.
    #[error("number of particles must be at least 1")]
    NoParticles,

    /// A resampling weight vector is empty, all zero, negative or non-finite.
    #[error("invalid resampling weights: {reason}")]
    InvalidWeights { reason: &'static str },

    /// A parent-index tree description is inconsistent.
    #[error("invalid tree structure: {0}")]
    InvalidTreeStructure(String),

    /// A simulation setting is out of range.
    #[error("invalid simulation config: {0}")]
    InvalidSimulationConfig(String),
}
