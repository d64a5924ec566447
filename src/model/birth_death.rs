//! Linear birth-death epidemic model.
//!
//! Suitable for the exponential growth phase of an epidemic: there is no
//! susceptible depletion, every infected individual transmits, recovers and
//! is sampled at per-capita rates.
//!
//! Propensities at infected count I in interval k:
//!     infection          = β_k · I
//!     recovery           = γ_k · I
//!     psi sample, remove = ψ_k · r_k · I
//!     psi sample, keep   = ψ_k · (1 − r_k) · I
//!
//! where r_k is the probability that a psi-sampled individual is removed.

use crate::error::EpiResult;
use crate::event::{EpidemicEvent, EpidemicEventType, RateVariable};
use crate::state::EpidemicState;

use super::schedule::{ModelSchedule, RateParameter, RhoSampling, DEFAULT_TOLERANCE};
use super::{EpidemicModel, Propensities};

/// Parameters of a birth-death model.
#[derive(Clone, Debug, PartialEq)]
pub struct BirthDeathParams {
    /// Per-capita infection (birth) rate β.
    pub infection_rate: RateParameter,
    /// Per-capita recovery (death) rate γ.
    pub recovery_rate: RateParameter,
    /// Per-capita psi-sampling rate ψ. `None` means no explicit sampling process.
    pub psi_sampling_rate: Option<RateParameter>,
    /// Probability that a psi-sampled individual is removed.
    pub removal_prob: RateParameter,
    /// Scheduled rho-sampling instants.
    pub rho_sampling: Vec<RhoSampling>,
    /// Time-equality tolerance at schedule boundaries.
    pub tolerance: f64,
}

impl BirthDeathParams {
    /// Constant infection and recovery rates, no sampling process.
    pub fn constant(infection_rate: f64, recovery_rate: f64) -> Self {
        Self {
            infection_rate: RateParameter::constant(infection_rate),
            recovery_rate: RateParameter::constant(recovery_rate),
            psi_sampling_rate: None,
            removal_prob: RateParameter::constant(1.0),
            rho_sampling: Vec::new(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Add a constant psi-sampling process.
    pub fn with_psi_sampling(mut self, psi_sampling_rate: f64, removal_prob: f64) -> Self {
        self.psi_sampling_rate = Some(RateParameter::constant(psi_sampling_rate));
        self.removal_prob = RateParameter::constant(removal_prob);
        self
    }

    /// Add a rho-sampling instant.
    pub fn with_rho_sampling(mut self, time: f64, prob: f64) -> Self {
        self.rho_sampling.push(RhoSampling::new(time, prob));
        self
    }
}

/// Birth-death epidemic model with a piecewise-constant rate schedule.
#[derive(Clone, Debug)]
pub struct BirthDeathModel {
    params: BirthDeathParams,
    schedule: ModelSchedule,
}

impl BirthDeathModel {
    /// Validate parameters and precompute the rate schedule.
    pub fn new(params: BirthDeathParams) -> EpiResult<Self> {
        let mut parameters = vec![
            (RateVariable::InfectionRate, &params.infection_rate),
            (RateVariable::RecoveryRate, &params.recovery_rate),
            (RateVariable::RemovalProb, &params.removal_prob),
        ];
        if let Some(psi) = &params.psi_sampling_rate {
            parameters.push((RateVariable::PsiSamplingRate, psi));
        }

        let schedule = ModelSchedule::build(&parameters, &params.rho_sampling, params.tolerance)?;

        Ok(Self { params, schedule })
    }

    /// Model parameters.
    pub fn params(&self) -> &BirthDeathParams {
        &self.params
    }
}

impl EpidemicModel for BirthDeathModel {
    fn initial_state(&self) -> EpidemicState {
        EpidemicState::new(0.0, 1.0, 0.0)
    }

    fn schedule(&self) -> &ModelSchedule {
        &self.schedule
    }

    fn propensities(&self, state: &EpidemicState) -> Propensities {
        let rates = self.schedule.rates(state.model_interval_idx);
        let infected = state.i.max(0.0);
        let psi = rates.psi_sampling * infected;

        Propensities {
            infection: rates.infection * infected,
            recovery: rates.recovery * infected,
            psi_sample_remove: psi * rates.removal_prob,
            psi_sample_no_remove: psi * (1.0 - rates.removal_prob),
        }
    }

    fn increment_state(&self, state: &mut EpidemicState, event: EpidemicEvent) {
        match event.event_type {
            EpidemicEventType::Infection => {
                state.i += event.count();
                state.cumulative_infections += event.count();
            }
            EpidemicEventType::Recovery
            | EpidemicEventType::RhoSample
            | EpidemicEventType::PsiSampleRemove
            | EpidemicEventType::OtherSample => {
                state.i -= event.count();
            }
            EpidemicEventType::PsiSampleNoRemove => {}
        }
    }

    fn is_critical(
        &self,
        state: &EpidemicState,
        propensities: &Propensities,
        alpha: f64,
        tau: f64,
    ) -> bool {
        let expected_removals = tau * propensities.removal();
        expected_removals + alpha * expected_removals.sqrt() >= state.i
    }

    fn has_psi_sampling(&self) -> bool {
        self.params.psi_sampling_rate.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EpiError;

    fn model() -> BirthDeathModel {
        BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0).with_psi_sampling(0.5, 0.8))
            .unwrap()
    }

    #[test]
    fn test_initial_state() {
        let state = model().initial_state();
        assert_eq!((state.s, state.i, state.r), (0.0, 1.0, 0.0));
        assert_eq!(state.cumulative_infections, 0.0);
        assert_eq!(state.model_interval_idx, 0);
    }

    #[test]
    fn test_propensities_scale_with_infecteds() {
        let model = model();
        let mut state = model.initial_state();
        state.i = 4.0;

        let props = model.propensities(&state);
        assert_eq!(props.infection, 8.0);
        assert_eq!(props.recovery, 4.0);
        assert!((props.psi_sample_remove - 1.6).abs() < 1e-12);
        assert!((props.psi_sample_no_remove - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_propensities_never_negative() {
        let model = model();
        let mut state = model.initial_state();
        state.i = -3.0;
        let props = model.propensities(&state);
        assert!(props.as_array().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_propensities_follow_interval() {
        let mut params = BirthDeathParams::constant(2.0, 1.0);
        params.infection_rate = RateParameter::piecewise(vec![2.0, 5.0], vec![1.0]);
        let model = BirthDeathModel::new(params).unwrap();

        let mut state = model.initial_state();
        assert_eq!(model.next_model_event_time(&state), 1.0);
        assert_eq!(model.propensities(&state).infection, 2.0);

        state.model_interval_idx = 1;
        assert_eq!(model.propensities(&state).infection, 5.0);
        assert_eq!(model.next_model_event_time(&state), f64::INFINITY);
        assert!(model.next_model_event(&state).is_none());
    }

    #[test]
    fn test_infection_increment() {
        let model = model();
        let mut state = model.initial_state();
        model.increment_state(&mut state, EpidemicEvent::new(EpidemicEventType::Infection, 3));
        assert_eq!(state.i, 4.0);
        assert_eq!(state.cumulative_infections, 3.0);
    }

    #[test]
    fn test_removal_increments() {
        let model = model();
        for event_type in [
            EpidemicEventType::Recovery,
            EpidemicEventType::RhoSample,
            EpidemicEventType::PsiSampleRemove,
            EpidemicEventType::OtherSample,
        ] {
            let mut state = model.initial_state();
            state.i = 5.0;
            model.increment_state(&mut state, EpidemicEvent::new(event_type, 2));
            assert_eq!(state.i, 3.0, "{:?}", event_type);
            assert_eq!(state.cumulative_infections, 0.0, "{:?}", event_type);
        }
    }

    #[test]
    fn test_sampled_ancestor_leaves_state() {
        let model = model();
        let mut state = model.initial_state();
        state.i = 5.0;
        model.increment_state(&mut state, EpidemicEvent::new(EpidemicEventType::PsiSampleNoRemove, 2));
        assert_eq!(state.i, 5.0);
    }

    #[test]
    fn test_overshoot_gives_invalid_state() {
        let model = model();
        let mut state = model.initial_state();
        model.increment_state(&mut state, EpidemicEvent::other_samples(2));
        assert!(!state.is_valid());
    }

    #[test]
    fn test_is_critical() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(1.0, 1.0)).unwrap();
        let mut state = model.initial_state();

        state.i = 100.0;
        let props = model.propensities(&state);
        assert!(!model.is_critical(&state, &props, 3.0, 0.01));
        assert!(model.is_critical(&state, &props, 3.0, 2.0));

        state.i = 2.0;
        let props = model.propensities(&state);
        assert!(model.is_critical(&state, &props, 3.0, 0.5));
    }

    #[test]
    fn test_has_psi_sampling() {
        assert!(model().has_psi_sampling());
        let plain = BirthDeathModel::new(BirthDeathParams::constant(1.0, 1.0)).unwrap();
        assert!(!plain.has_psi_sampling());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let result = BirthDeathModel::new(BirthDeathParams::constant(-1.0, 1.0));
        assert!(matches!(result, Err(EpiError::InvalidRate { .. })));

        let result = BirthDeathModel::new(BirthDeathParams::constant(1.0, 1.0).with_psi_sampling(1.0, 2.0));
        assert!(matches!(result, Err(EpiError::InvalidProbability { .. })));
    }
}
