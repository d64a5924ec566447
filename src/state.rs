//! Epidemic state representation.
//!
//! A state is a snapshot of compartment counts plus the bookkeeping needed to
//! resume simulation: current time, the active interval of the rate schedule
//! and the number of observed events already consumed.

use std::fmt;

/// Simulation algorithm that last advanced a state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Not advanced by a simulator (fresh state, or advanced by the particle filter).
    #[default]
    NotApplicable,
    /// Exact stochastic simulation (one jump at a time).
    Ssa,
    /// Tau-leaping approximation.
    TauLeap,
}

/// Compartmental state of an epidemic trajectory.
///
/// Key properties:
/// - `Copy` value type: particles own their state exclusively
/// - Counts are `f64` so that an overshooting update stays representable
///   and is caught by [`EpidemicState::is_valid`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpidemicState {
    /// Susceptible count.
    pub s: f64,
    /// Infected count.
    pub i: f64,
    /// Removed count.
    pub r: f64,
    /// Number of infection events since the origin.
    pub cumulative_infections: f64,
    /// Current time (measured forward from the origin).
    pub time: f64,
    /// Index of the active rate interval, equal to the number of model
    /// events already consumed.
    pub model_interval_idx: usize,
    /// Index into the observed event sequence.
    pub observed_event_idx: usize,
    /// Algorithm that produced this state.
    pub algorithm: Algorithm,
}

impl EpidemicState {
    /// Create a state at time zero.
    pub fn new(s: f64, i: f64, r: f64) -> Self {
        Self::with_cumulative(s, i, r, 0.0)
    }

    /// Create a state at time zero with a given cumulative infection count.
    pub fn with_cumulative(s: f64, i: f64, r: f64, cumulative_infections: f64) -> Self {
        Self {
            s,
            i,
            r,
            cumulative_infections,
            time: 0.0,
            model_interval_idx: 0,
            observed_event_idx: 0,
            algorithm: Algorithm::NotApplicable,
        }
    }

    /// True if no compartment is negative.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.s >= 0.0 && self.i >= 0.0 && self.r >= 0.0
    }

    /// Header line for the whitespace-separated record format.
    pub fn header() -> &'static str {
        "S I R cumulativeInfections"
    }

    /// This state as one record line, counts truncated to integers.
    pub fn record(&self) -> String {
        format!(
            "{} {} {} {}",
            self.s as i64, self.i as i64, self.r as i64, self.cumulative_infections as i64
        )
    }
}

impl Default for EpidemicState {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl fmt::Display for EpidemicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S: {}, I: {}, R: {}, CI: {}",
            self.s, self.i, self.r, self.cumulative_infections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_creation() {
        let state = EpidemicState::new(10.0, 1.0, 0.0);
        assert_eq!(state.time, 0.0);
        assert_eq!(state.model_interval_idx, 0);
        assert_eq!(state.observed_event_idx, 0);
        assert_eq!(state.cumulative_infections, 0.0);
        assert_eq!(state.algorithm, Algorithm::NotApplicable);
        assert!(state.is_valid());
    }

    #[test]
    fn test_negative_compartment_is_invalid() {
        let mut state = EpidemicState::new(0.0, 1.0, 0.0);
        state.i -= 2.0;
        assert!(!state.is_valid());

        let state = EpidemicState::new(0.0, 0.0, -1.0);
        assert!(!state.is_valid());
    }

    #[test]
    fn test_copies_are_independent() {
        let original = EpidemicState::new(0.0, 3.0, 0.0);
        let mut copy = original;
        copy.i += 1.0;
        copy.time = 2.5;
        assert_eq!(original.i, 3.0);
        assert_eq!(original.time, 0.0);
    }

    #[test]
    fn test_record_truncates_counts() {
        let state = EpidemicState::with_cumulative(4.9, 2.2, 1.0, 7.7);
        assert_eq!(state.record(), "4 2 1 7");
        assert_eq!(EpidemicState::header(), "S I R cumulativeInfections");
    }

    #[test]
    fn test_display() {
        let state = EpidemicState::new(1.0, 2.0, 3.0);
        assert_eq!(format!("{}", state), "S: 1, I: 2, R: 3, CI: 0");
    }
}
