//! Time-step controller: trial sizing, reattempt-on-failure, remesh-on-reached-end,
//! and a ring-buffer checkpoint/rollback.

use log::{info, warn};

use crate::config::SimulationParameters;
use crate::error::{EngineError, EngineResult, FailureCode, StepError};
use crate::fracture::Fracture;
use crate::grid::Grid;

/// A saved (grid, fracture, dt) state the controller can roll back to.
#[derive(Clone)]
struct Checkpoint {
    grid: Grid,
    fracture: Fracture,
    dt: f64,
}

const CHECKPOINT_CAPACITY: usize = 5;
const PREFACTOR_FLOOR: f64 = 0.1;

/// Ring buffer of the last `CHECKPOINT_CAPACITY` accepted states, oldest
/// overwritten first.
struct CheckpointRing {
    buf: Vec<Checkpoint>,
}

impl CheckpointRing {
    fn new() -> Self {
        CheckpointRing { buf: Vec::with_capacity(CHECKPOINT_CAPACITY) }
    }

    fn push(&mut self, cp: Checkpoint) {
        if self.buf.len() == CHECKPOINT_CAPACITY {
            self.buf.remove(0);
        }
        self.buf.push(cp);
    }

    /// Removes and returns the oldest surviving checkpoint: rollback targets
    /// the oldest still-good entry, not the most recently pushed one.
    fn pop_oldest(&mut self) -> Option<Checkpoint> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.remove(0))
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The function signature a caller supplies for a single attempted step:
/// given the current grid/fracture and a trial `dt`, either return the
/// advanced fracture or a `StepError` describing why the attempt failed.
pub trait StepAttempt {
    fn try_step(&mut self, grid: &Grid, fracture: &Fracture, dt: f64) -> Result<Fracture, StepError>;
}

/// Drives the reattempt/remesh/checkpoint loop around a `StepAttempt`
/// implementation (typically the front-tracking + EHD pipeline). Owns no
/// reference to `SimulationParameters` so a caller can hold both a
/// `TimeStepper` and its params in the same struct across many `advance`
/// calls; params is instead threaded through each call.
pub struct TimeStepper {
    checkpoints: CheckpointRing,
    prefactor: f64,
}

impl TimeStepper {
    pub fn new(params: &SimulationParameters) -> Self {
        TimeStepper {
            checkpoints: CheckpointRing::new(),
            prefactor: params.tm_stp_prefactor.value_at(0.0),
        }
    }

    /// Trial dt: `prefactor * min(hx, hy) / max(v)`, the CFL-like bound
    /// driven by grid spacing and the fastest front-normal velocity from the
    /// previous step, capped by `time_step_limit` and the remaining time to
    /// `final_time`. Before the front has any velocity history (nucleation,
    /// or a front that hasn't moved), falls back to `prev_dt` scaled by the
    /// prefactor, the same bound the controller used before a velocity field
    /// existed to size against.
    fn trial_dt(&self, params: &SimulationParameters, grid: &Grid, fracture: &Fracture, time: f64, prev_dt: f64) -> f64 {
        let max_v = fracture.v.iter().copied().fold(0.0_f64, f64::max);
        let raw = if max_v > 0.0 {
            self.prefactor * grid.hx.min(grid.hy) / max_v
        } else {
            prev_dt * self.prefactor
        };
        let capped = raw.min(params.time_step_limit);
        capped.min((params.final_time - time).max(0.0))
    }

    /// Advance one accepted step, internally reattempting with a reduced
    /// `dt` on geometric/numerical failure and remeshing on `ReachedEnd`.
    pub fn advance<A: StepAttempt>(
        &mut self,
        attempt: &mut A,
        grid: &mut Grid,
        fracture: &mut Fracture,
        params: &SimulationParameters,
        prev_dt: f64,
    ) -> EngineResult<f64> {
        let mut dt = self.trial_dt(params, grid, fracture, fracture.time, prev_dt).max(f64::MIN_POSITIVE);
        let mut reattempts = 0usize;

        loop {
            match attempt.try_step(grid, fracture, dt) {
                Ok(advanced) => {
                    self.checkpoints.push(Checkpoint {
                        grid: grid.clone(),
                        fracture: fracture.clone(),
                        dt,
                    });
                    *fracture = advanced;
                    // The prefactor is not reset to the configured schedule here: a
                    // reattempt decay (below) must keep suppressing future trial_dt
                    // calls across advance() invocations, per the rollback policy's
                    // "reduce the global prefactor" being a lasting effect rather
                    // than a per-call one. The schedule only seeds it at construction.
                    return Ok(dt);
                }
                Err(StepError::ReachedEnd) => {
                    info!("front reached grid edge, remeshing by factor {}", params.mesh_extension_factor);
                    let new_grid = grid.remesh(params.mesh_extension_factor);
                    remap_onto_extended_grid(grid, &new_grid, fracture);
                    *grid = new_grid;
                    // Retry the same dt on the extended grid rather than burning a reattempt.
                    continue;
                }
                Err(e) => {
                    let code = e.code();
                    warn!("step failed ({:?}), reattempt {}/{}", code, reattempts + 1, params.max_reattempts);
                    if !(code.is_geometric() || code.is_numerical()) {
                        return Err(EngineError::Step(e));
                    }
                    reattempts += 1;
                    if reattempts > params.max_reattempts {
                        return self.rollback(params, grid, fracture);
                    }
                    dt *= params.re_attempt_factor;
                    self.prefactor *= params.re_attempt_factor;
                    if self.prefactor < PREFACTOR_FLOOR {
                        return Err(EngineError::PrefactorCollapsed);
                    }
                }
            }
        }
    }

    /// Restore the oldest still-good checkpoint on terminal failure, or
    /// report `ExhaustedNoCheckpoint` if the ring buffer is empty.
    fn rollback(&mut self, params: &SimulationParameters, grid: &mut Grid, fracture: &mut Fracture) -> EngineResult<f64> {
        match self.checkpoints.pop_oldest() {
            Some(cp) => {
                *grid = cp.grid;
                *fracture = cp.fracture;
                Ok(cp.dt * params.re_attempt_factor)
            }
            None => Err(EngineError::ExhaustedNoCheckpoint),
        }
    }

    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.buf.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.checkpoints.is_empty() && self.prefactor < PREFACTOR_FLOOR
    }
}

/// Remap a fracture's per-cell fields from the old grid onto the larger
/// extended grid by nearest-cell lookup, leaving cells outside the old
/// footprint at zero width. The elasticity matrix is rebuilt
/// by the caller since it depends on the new grid's geometry.
fn remap_onto_extended_grid(old_grid: &Grid, new_grid: &Grid, fracture: &mut Fracture) {
    let n_new = new_grid.num_cells();
    let mut w = vec![0.0; n_new];
    let mut p = vec![0.0; n_new];
    let mut signed_dist = vec![f64::INFINITY; n_new];

    for old_cell in 0..old_grid.num_cells() {
        let (x, y) = old_grid.center_coor[old_cell];
        if let Some(new_cell) = new_grid.locate(x, y) {
            w[new_cell] = fracture.w[old_cell];
            p[new_cell] = fracture.p[old_cell];
            signed_dist[new_cell] = fracture.signed_dist[old_cell];
        }
    }

    fracture.w = w;
    fracture.p = p;
    fracture.signed_dist = signed_dist;
    fracture.mu_prime = vec![fracture.mu_prime.first().copied().unwrap_or(0.0); n_new];
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSucceeds;
    impl StepAttempt for AlwaysSucceeds {
        fn try_step(&mut self, _grid: &Grid, fracture: &Fracture, dt: f64) -> Result<Fracture, StepError> {
            let mut f = fracture.clone();
            f.time += dt;
            Ok(f)
        }
    }

    struct AlwaysFails;
    impl StepAttempt for AlwaysFails {
        fn try_step(&mut self, _grid: &Grid, _fracture: &Fracture, _dt: f64) -> Result<Fracture, StepError> {
            Err(StepError::Failure { code: FailureCode::EhdNotConverged })
        }
    }

    #[test]
    fn successful_step_advances_time_and_checkpoints() {
        let params = SimulationParameters::default();
        let mut stepper = TimeStepper::new(&params);
        let mut grid = Grid::new(5.0, 5.0, 9, 9, false);
        let mut fracture = Fracture::new(grid.num_cells(), 0.01);
        let mut attempt = AlwaysSucceeds;

        let dt = stepper.advance(&mut attempt, &mut grid, &mut fracture, &params, 1.0).unwrap();
        assert!(dt > 0.0);
        assert!(fracture.time > 0.0);
        assert_eq!(stepper.checkpoint_depth(), 1);
    }

    #[test]
    fn exhausted_reattempts_with_no_checkpoint_is_an_error() {
        let mut params = SimulationParameters::default();
        params.max_reattempts = 2;
        let mut stepper = TimeStepper::new(&params);
        let mut grid = Grid::new(5.0, 5.0, 9, 9, false);
        let mut fracture = Fracture::new(grid.num_cells(), 0.01);
        let mut attempt = AlwaysFails;

        let result = stepper.advance(&mut attempt, &mut grid, &mut fracture, &params, 1.0);
        assert!(matches!(result, Err(EngineError::ExhaustedNoCheckpoint)));
    }

    #[test]
    fn remap_preserves_width_at_matching_coordinates() {
        let old_grid = Grid::new(5.0, 5.0, 9, 9, false);
        let new_grid = old_grid.remesh(2.0);
        let mut fracture = Fracture::new(old_grid.num_cells(), 0.01);
        fracture.w[old_grid.center_elt] = 1e-3;
        remap_onto_extended_grid(&old_grid, &new_grid, &mut fracture);
        let new_center = new_grid.locate(0.0, 0.0).unwrap();
        assert_eq!(fracture.w.len(), new_grid.num_cells());
        assert!((fracture.w[new_center] - 1e-3).abs() < 1e-12);
    }
}
