//! Particle-filter likelihood of transmission trees under stochastic
//! epidemic models.
//!
//! An [`EpidemicModel`] describes a continuous-time jump process on
//! compartment counts with a piecewise-constant parameter schedule. Given a
//! time-ordered [`TreeEventList`], [`SmcTreeDensity`] estimates
//! log P(tree | model) by propagating an ensemble of simulated epidemic
//! trajectories between tree events, weighting each particle by the
//! probability that its hidden trajectory produced the observed event, and
//! resampling with replacement.
//!
//! [`TrajectorySimulator`] runs the same models forward (exact or
//! tau-leaping) for prior-predictive checks.
//!
//! With the `python` feature the crate builds as the `epi_smc` extension
//! module.

pub mod error;
pub mod event;
pub mod model;
pub mod resampling;
pub mod simulate;
pub mod smc;
pub mod state;
pub mod tree_events;

#[cfg(feature = "python")]
mod python;

pub use error::{EpiError, EpiResult};
pub use event::{EpidemicEvent, EpidemicEventType, ModelEvent, ModelEventKind, RateVariable};
pub use model::{
    BirthDeathModel, BirthDeathParams, EpidemicModel, ModelSchedule, Propensities, RateParameter,
    RhoSampling,
};
pub use resampling::ReplacementSampler;
pub use simulate::{simulate_trajectories_parallel, SimulationConfig, Trajectory, TrajectorySimulator};
pub use smc::{SampledAncestorPolicy, SmcConfig, SmcSummary, SmcTreeDensity};
pub use state::{Algorithm, EpidemicState};
pub use tree_events::{TreeEvent, TreeEventList, TreeEventType};
