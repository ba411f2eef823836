use serde::{Deserialize, Serialize};

/// Mutually exclusive solver regimes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverRegime {
    VolumeControl,
    ViscousInjection,
    DryCrackMechLoading,
}

/// Tip-asymptote family selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipAsymptoteFamily {
    K,
    M,
    Mt,
    Mk,
    U,
}

/// Front-loop variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontAdvancing {
    Explicit,
    SemiImplicit,
    Implicit,
}

/// Front-reconstruction projection method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionMethod {
    /// Implicit level-set algorithm: per-cell zero-vertex/(alpha, l) geometry.
    Ilsa,
    /// Continuous smoothed-polygon front; reuses the ILSA per-cell geometry as
    /// its input and is only fully specified for ribbon-cell angle projection.
    LsContinuousFront,
}

/// EHD outer-iteration scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EhdSolverScheme {
    Picard,
    ImplicitAnderson,
    ImplicitNewton,
}

/// A piecewise-constant schedule: the value active at time `t` is the entry with
/// the largest `time <= t` (used for `tmStpPrefactor` and the injection schedule).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schedule {
    /// (time, value) pairs, must be sorted ascending by time.
    pub points: Vec<(f64, f64)>,
}

impl Schedule {
    pub fn constant(value: f64) -> Self {
        Schedule {
            points: vec![(0.0, value)],
        }
    }

    /// Rate/value active at time `t`: the entry with the largest `time <= t`.
    pub fn value_at(&self, t: f64) -> f64 {
        self.points
            .iter()
            .rev()
            .find(|(time, _)| *time <= t)
            .map(|(_, v)| *v)
            .unwrap_or_else(|| self.points.first().map(|(_, v)| *v).unwrap_or(0.0))
    }
}

/// All tunable caps/tolerances/flags named in Configuration Options table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub final_time: f64,
    pub time_step_limit: f64,
    pub tm_stp_prefactor: Schedule,

    /// Injection rate Q(t) (m^3/s), sampled at the center cell per step.
    pub injection_rate: Schedule,

    pub max_solver_itrs: usize,
    pub tol_ehd: f64,

    pub max_front_itr: usize,
    pub tol_fract_front: f64,

    pub max_toughness_itr: usize,
    pub tol_toughness: f64,

    pub max_reattempts: usize,
    pub re_attempt_factor: f64,

    pub regime: SolverRegime,
    pub front_advancing: FrontAdvancing,
    pub gravity: bool,
    pub symmetric: bool,
    pub tip_asymptote: TipAsymptoteFamily,
    pub proj_method: ProjectionMethod,
    pub elastohydr_solver: EhdSolverScheme,
    pub save_regime: bool,

    pub mesh_extension_factor: f64,

    /// Load-bearing stagnant-cell detection threshold; exposed
    /// as a knob rather than hard-coded.
    pub stagnant_rel_tol: f64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        SimulationParameters {
            final_time: f64::INFINITY,
            time_step_limit: f64::INFINITY,
            tm_stp_prefactor: Schedule::constant(0.8),

            injection_rate: Schedule::constant(0.0),

            max_solver_itrs: 100,
            tol_ehd: 1e-6,

            max_front_itr: 25,
            tol_fract_front: 1e-3,

            max_toughness_itr: 25,
            tol_toughness: 1e-3,

            max_reattempts: 10,
            re_attempt_factor: 0.8,

            regime: SolverRegime::VolumeControl,
            front_advancing: FrontAdvancing::Implicit,
            gravity: false,
            symmetric: false,
            tip_asymptote: TipAsymptoteFamily::K,
            proj_method: ProjectionMethod::Ilsa,
            elastohydr_solver: EhdSolverScheme::Picard,
            save_regime: false,

            mesh_extension_factor: 2.0,

            stagnant_rel_tol: 1e-5,
        }
    }
}
