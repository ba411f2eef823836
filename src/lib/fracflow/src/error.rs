use thiserror::Error;

/// Structured failure codes returned from `advance`, matching of the engine spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureCode {
    NotAttempted = 0,
    Success = 1,
    InvalidLevelSet = 2,
    FrontUntracked = 3,
    InvalidTipVolume = 4,
    EhdInvalid = 5,
    EhdNotConverged = 6,
    TipInversionFailed = 7,
    RibbonNotFoundInEnclosure = 8,
    FillFractionOutOfRange = 9,
    ToughnessNotConverged = 10,
    ProjectionNotFound = 11,
    ReachedEndOfGrid = 12,
}

impl FailureCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Geometric failures: handled by time-step reduction, except code 12 which remeshes.
    pub fn is_geometric(self) -> bool {
        matches!(
            self,
            FailureCode::InvalidLevelSet
                | FailureCode::FrontUntracked
                | FailureCode::FillFractionOutOfRange
                | FailureCode::ProjectionNotFound
                | FailureCode::ReachedEndOfGrid
        )
    }

    /// Numerical failures: always handled by time-step reduction.
    pub fn is_numerical(self) -> bool {
        matches!(
            self,
            FailureCode::InvalidTipVolume
                | FailureCode::EhdInvalid
                | FailureCode::EhdNotConverged
                | FailureCode::TipInversionFailed
                | FailureCode::RibbonNotFoundInEnclosure
                | FailureCode::ToughnessNotConverged
        )
    }
}

/// An error produced while attempting to advance the fracture by one step.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("geometric or numerical step failure: {code:?}")]
    Failure { code: FailureCode },

    #[error("reached end of grid, remesh required")]
    ReachedEnd,
}

impl StepError {
    pub fn code(&self) -> FailureCode {
        match self {
            StepError::Failure { code } => *code,
            StepError::ReachedEnd => FailureCode::ReachedEndOfGrid,
        }
    }
}

/// Terminal, unrecoverable failures of the time stepper.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("time-step reattempts exhausted with no checkpoint available")]
    ExhaustedNoCheckpoint,

    #[error("time-step prefactor fell below the terminal floor (0.1)")]
    PrefactorCollapsed,

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type StepResult<T> = Result<T, StepError>;
