//! Epidemic jump-process events and externally scheduled model events.

/// Kind of jump-process event a model can apply to a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EpidemicEventType {
    Infection,
    Recovery,
    RhoSample,
    PsiSampleRemove,
    PsiSampleNoRemove,
    OtherSample,
}

/// A jump-process event with multiplicity (number of simultaneous occurrences).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpidemicEvent {
    pub event_type: EpidemicEventType,
    pub multiplicity: u32,
}

impl EpidemicEvent {
    pub fn new(event_type: EpidemicEventType, multiplicity: u32) -> Self {
        Self {
            event_type,
            multiplicity,
        }
    }

    pub fn infection() -> Self {
        Self::new(EpidemicEventType::Infection, 1)
    }

    pub fn recovery() -> Self {
        Self::new(EpidemicEventType::Recovery, 1)
    }

    pub fn psi_sample_remove() -> Self {
        Self::new(EpidemicEventType::PsiSampleRemove, 1)
    }

    pub fn psi_sample_no_remove() -> Self {
        Self::new(EpidemicEventType::PsiSampleNoRemove, 1)
    }

    /// Batch of `n` individuals sampled by a scheduled rho-sampling event.
    pub fn rho_samples(n: u32) -> Self {
        Self::new(EpidemicEventType::RhoSample, n)
    }

    /// Batch of `n` samples not attributed to any modelled sampling process.
    pub fn other_samples(n: u32) -> Self {
        Self::new(EpidemicEventType::OtherSample, n)
    }

    /// Multiplicity as a count.
    #[inline]
    pub fn count(&self) -> f64 {
        self.multiplicity as f64
    }
}

/// Rate variable whose value a rate-change event replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateVariable {
    InfectionRate,
    RecoveryRate,
    PsiSamplingRate,
    RemovalProb,
}

impl RateVariable {
    pub fn name(&self) -> &'static str {
        match self {
            RateVariable::InfectionRate => "infection_rate",
            RateVariable::RecoveryRate => "recovery_rate",
            RateVariable::PsiSamplingRate => "psi_sampling_rate",
            RateVariable::RemovalProb => "removal_prob",
        }
    }
}

/// What happens at a scheduled model event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ModelEventKind {
    /// A rate variable takes a new value from this time on.
    RateChange { variable: RateVariable, value: f64 },
    /// Every infected is sampled independently with probability `rho`.
    RhoSampling { rho: f64 },
}

/// An externally scheduled event with its time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelEvent {
    pub time: f64,
    pub kind: ModelEventKind,
}

impl ModelEvent {
    pub fn rate_change(time: f64, variable: RateVariable, value: f64) -> Self {
        Self {
            time,
            kind: ModelEventKind::RateChange { variable, value },
        }
    }

    pub fn rho_sampling(time: f64, rho: f64) -> Self {
        Self {
            time,
            kind: ModelEventKind::RhoSampling { rho },
        }
    }

    #[inline]
    pub fn is_rho_sampling(&self) -> bool {
        matches!(self.kind, ModelEventKind::RhoSampling { .. })
    }

    /// Sampling probability of a rho-sampling event.
    pub fn rho(&self) -> Option<f64> {
        match self.kind {
            ModelEventKind::RhoSampling { rho } => Some(rho),
            ModelEventKind::RateChange { .. } => None,
        }
    }

    /// Order of events sharing a time: rho sampling happens under the rates in
    /// force before a coincident rate change.
    pub(crate) fn tie_rank(&self) -> u8 {
        match self.kind {
            ModelEventKind::RhoSampling { .. } => 0,
            ModelEventKind::RateChange { .. } => 1,
        }
    }
}
