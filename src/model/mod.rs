//! Stochastic epidemic models.
//!
//! A model defines event propensities as a function of the current state,
//! how each event type changes the state, and the schedule of externally
//! imposed model events (rate changes and rho sampling).

pub mod birth_death;
pub mod schedule;

pub use birth_death::{BirthDeathModel, BirthDeathParams};
pub use schedule::{ModelSchedule, RateParameter, Rates, RhoSampling, DEFAULT_TOLERANCE};

use crate::event::{EpidemicEvent, ModelEvent};
use crate::state::EpidemicState;

/// Instantaneous event rates at one state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Propensities {
    pub infection: f64,
    pub recovery: f64,
    pub psi_sample_remove: f64,
    pub psi_sample_no_remove: f64,
}

impl Propensities {
    /// Sum over all event types.
    #[inline]
    pub fn total(&self) -> f64 {
        self.infection + self.recovery + self.psi_sample_remove + self.psi_sample_no_remove
    }

    /// Rate of events that remove an infected individual.
    #[inline]
    pub fn removal(&self) -> f64 {
        self.recovery + self.psi_sample_remove
    }

    /// Propensities in fixed order: infection, recovery, psi-remove, psi-no-remove.
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.infection,
            self.recovery,
            self.psi_sample_remove,
            self.psi_sample_no_remove,
        ]
    }
}

/// Stochastic epidemic model.
///
/// Implementations are shared read-only between particles, so they must be
/// `Send + Sync` and keep no per-call mutable state.
pub trait EpidemicModel: Send + Sync {
    /// Fresh state at the origin.
    fn initial_state(&self) -> EpidemicState;

    /// Rate schedule and model events.
    fn schedule(&self) -> &ModelSchedule;

    /// Event propensities at `state`, using the rates of its active interval.
    fn propensities(&self, state: &EpidemicState) -> Propensities;

    /// Apply `event` to `state`. Overshooting a compartment leaves the state
    /// invalid rather than panicking.
    fn increment_state(&self, state: &mut EpidemicState, event: EpidemicEvent);

    /// True when a tau-leap of length `tau` could plausibly exhaust the
    /// infected compartment, in which case single-event stepping must be used.
    fn is_critical(
        &self,
        state: &EpidemicState,
        propensities: &Propensities,
        alpha: f64,
        tau: f64,
    ) -> bool;

    /// Whether an explicit psi-sampling process is part of the model.
    fn has_psi_sampling(&self) -> bool;

    /// Time of the first unconsumed model event, or infinity.
    fn next_model_event_time(&self, state: &EpidemicState) -> f64 {
        self.schedule().next_event_time(state.model_interval_idx)
    }

    /// First unconsumed model event.
    fn next_model_event(&self, state: &EpidemicState) -> Option<&ModelEvent> {
        self.schedule().event(state.model_interval_idx)
    }

    /// Tolerance for time equality at schedule boundaries.
    fn tolerance(&self) -> f64 {
        self.schedule().tolerance()
    }

    /// Equality of two times up to [`EpidemicModel::tolerance`].
    fn times_equal(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.tolerance()
    }
}
