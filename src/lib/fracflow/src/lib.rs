//! Planar hydraulic-fracture propagation engine: a Cartesian grid, an
//! implicit-level-set front tracker, a coupled width/pressure
//! elasto-hydrodynamic solver and a time-step controller, wired together
//! behind a thin host-facing binding layer.

pub mod config;
pub mod ehd;
pub mod elasticity;
pub mod error;
pub mod fast_marching;
pub mod fracture;
pub mod front;
pub mod grid;
pub mod materials;
pub mod root_find;
pub mod stepper;
pub mod symmetry;
pub mod tip_asymptote;
pub mod tip_volume;

use wasm_bindgen::prelude::*;

use config::SimulationParameters;
use elasticity::ElasticityMatrix;
use error::{EngineError, FailureCode, StepError};
use fracture::Fracture;
use grid::Grid;
use materials::MaterialProperties;
use stepper::{StepAttempt, TimeStepper};
use tip_asymptote::RibbonArgs;
use tip_volume::TipCellInputs;

#[wasm_bindgen(start)]
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
    let _ = env_logger::try_init();
}

/// One attempt at advancing the fracture by `dt`: toughness/front outer loop
/// wrapping tip inversion, fast marching, front reconstruction, tip
/// volume integration and the coupled EHD solve.
struct Propagator<'a> {
    materials: &'a MaterialProperties,
    elasticity: &'a mut ElasticityMatrix,
    params: &'a SimulationParameters,
}

impl<'a> Propagator<'a> {
    /// Widths/pressures for all `EltCrack` cells given the current partition,
    /// tip average widths already fixed, solved with the configured EHD
    /// scheme.
    fn solve_width_pressure(
        &mut self,
        grid: &Grid,
        crack: &[usize],
        channel: &[usize],
        tip: &[usize],
        tip_avg_w: &[f64],
        w_prev: &[f64],
        p_prev: &[f64],
        fill_frac: &[f64],
        dt: f64,
        injection_rate: f64,
    ) -> Result<(Vec<f64>, Vec<f64>), StepError> {
        let n = grid.num_cells();
        let mut w = w_prev.to_vec();
        for (&t, &avg) in tip.iter().zip(tip_avg_w.iter()) {
            w[t] = avg;
        }

        let channel_set: std::collections::HashMap<usize, usize> =
            channel.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        let c_cc = ehd::with_tip_correction(self.elasticity, tip, fill_frac, |c| {
            let nc = channel.len();
            let mut out = nalgebra::DMatrix::<f64>::zeros(nc, nc);
            for (a, &ci) in channel.iter().enumerate() {
                for (b, &cj) in channel.iter().enumerate() {
                    out[(a, b)] = c[(ci, cj)];
                }
            }
            out
        });

        let c_ct_w_tip: Vec<f64> = ehd::with_tip_correction(self.elasticity, tip, fill_frac, |c| {
            channel
                .iter()
                .map(|&ci| tip.iter().zip(tip_avg_w.iter()).map(|(&tj, &wt)| c[(ci, tj)] * wt).sum())
                .collect()
        });

        let sigma0_channel: Vec<f64> = channel.iter().map(|&c| self.materials.sigma0[c]).collect();
        let w_prev_channel: Vec<f64> = channel.iter().map(|&c| w_prev[c]).collect();

        let (delta_w, p_uniform) = match self.params.regime {
            config::SolverRegime::VolumeControl | config::SolverRegime::DryCrackMechLoading => {
                let tip_vol_change: f64 = tip
                    .iter()
                    .zip(tip_avg_w.iter())
                    .map(|(&t, &avg)| (avg - w_prev[t]) * grid.cell_area)
                    .sum();
                let leakoff_sum: f64 = channel
                    .iter()
                    .map(|&c| self.materials.c_prime[c] * dt.sqrt().max(1e-300) * grid.cell_area)
                    .sum();

                if grid.symmetric {
                    let reps: Vec<usize> = channel
                        .iter()
                        .copied()
                        .filter(|&c| grid.symmetry_map[c].canonical == c)
                        .collect();

                    let (cs_channel, c_ct_reps) = ehd::with_tip_correction(self.elasticity, tip, fill_frac, |c| {
                        let (cs_full, reps_full) = elasticity::symmetric_reduce_matrix(c, grid);
                        let pos_of: std::collections::HashMap<usize, usize> =
                            reps_full.iter().enumerate().map(|(i, &r)| (r, i)).collect();
                        let nc = reps.len();
                        let mut cs = nalgebra::DMatrix::<f64>::zeros(nc, nc);
                        for (a, &ri) in reps.iter().enumerate() {
                            for (b, &rj) in reps.iter().enumerate() {
                                cs[(a, b)] = cs_full[(pos_of[&ri], pos_of[&rj])];
                            }
                        }
                        let c_ct: Vec<f64> = reps
                            .iter()
                            .map(|&ri| tip.iter().zip(tip_avg_w.iter()).map(|(&tj, &wt)| c[(ri, tj)] * wt).sum())
                            .collect();
                        (cs, c_ct)
                    });

                    let sigma0_reps: Vec<f64> = reps.iter().map(|&c| self.materials.sigma0[c]).collect();
                    let w_prev_reps: Vec<f64> = reps.iter().map(|&c| w_prev[c]).collect();
                    let weights: Vec<f64> = reps.iter().map(|&c| grid.symmetry_map[c].weight as f64).collect();

                    let (delta_w_reps, p_uniform) = ehd::solve_volume_control(
                        &cs_channel,
                        &sigma0_reps,
                        &w_prev_reps,
                        &c_ct_reps,
                        injection_rate * dt,
                        tip_vol_change,
                        leakoff_sum,
                        Some(&weights),
                    )?;

                    let rep_index: std::collections::HashMap<usize, usize> =
                        reps.iter().enumerate().map(|(i, &r)| (r, i)).collect();
                    let delta_w: Vec<f64> = channel
                        .iter()
                        .map(|&c| delta_w_reps[rep_index[&grid.symmetry_map[c].canonical]])
                        .collect();
                    (delta_w, p_uniform)
                } else {
                    ehd::solve_volume_control(
                        &c_cc,
                        &sigma0_channel,
                        &w_prev_channel,
                        &c_ct_w_tip,
                        injection_rate * dt,
                        tip_vol_change,
                        leakoff_sum,
                        None,
                    )?
                }
            }
            config::SolverRegime::ViscousInjection => {
                let in_crack: Vec<bool> = (0..n).map(|c| crack.contains(&c)).collect();
                let mu_prime = self.materials.fluid.mu_prime();
                let compressibility = self.materials.fluid.compressibility.max(1e-12);
                let turbulent = if self.materials.fluid.turbulent {
                    Some((self.materials.fluid.density, self.materials.fluid.grain_size))
                } else {
                    None
                };

                let sources: Vec<f64> = channel
                    .iter()
                    .map(|&c| {
                        let inj = if c == grid.center_elt { injection_rate } else { 0.0 };
                        inj * dt / grid.cell_area - self.materials.c_prime[c] * dt.sqrt().max(1e-300)
                    })
                    .collect();
                let gravity = if self.params.gravity {
                    ehd::gravity_source(grid, channel, &w, self.materials.fluid.density, mu_prime)
                } else {
                    nalgebra::DVector::zeros(channel.len())
                };
                let sources_with_gravity: Vec<f64> =
                    sources.iter().zip(gravity.iter()).map(|(&s, &g)| s + dt * g).collect();

                let p0: Vec<f64> = channel.iter().map(|&c| p_prev[c]).collect();
                let mut p_full = p_prev.to_vec();

                let (w_converged, _iters) = ehd::picard_iterate(
                    self.params.regime,
                    &w_prev_channel,
                    &p0,
                    self.params.max_solver_itrs,
                    self.params.tol_ehd,
                    0.7,
                    |w_trial| {
                        let mut w_full = w.clone();
                        for (&c, &wt) in channel.iter().zip(w_trial.iter()) {
                            w_full[c] = wt;
                        }
                        let l_full =
                            ehd::assemble_flow_operator_dense(grid, channel, &w_full, &p_full, mu_prime, &in_crack, turbulent);
                        let w_half: Vec<f64> = channel.iter().map(|&c| 0.5 * (w_full[c] + w_prev[c])).collect();
                        let dw = ehd::solve_ehd_deltap(
                            &c_cc,
                            &l_full,
                            dt,
                            compressibility,
                            &w_half,
                            &w_prev_channel,
                            &sources_with_gravity,
                        )?;
                        let w_candidate: Vec<f64> =
                            w_prev_channel.iter().zip(dw.iter()).map(|(&wp, &d)| wp + d).collect();
                        let p_candidate: Vec<f64> = (0..channel.len())
                            .map(|idx| {
                                let c = channel[idx];
                                let mut acc = self.materials.sigma0[c] + c_ct_w_tip[idx];
                                for (b, &wc) in w_candidate.iter().enumerate() {
                                    acc += c_cc[(idx, b)] * wc;
                                }
                                acc
                            })
                            .collect();
                        for (&c, &pc) in channel.iter().zip(p_candidate.iter()) {
                            p_full[c] = pc;
                        }
                        Ok((w_candidate, p_candidate))
                    },
                )?;

                let dw: Vec<f64> = channel.iter().zip(w_converged.iter()).map(|(&c, &wn)| wn - w_prev[c]).collect();
                (dw, 0.0)
            }
        };

        for (&c, &dw) in channel.iter().zip(delta_w.iter()) {
            w[c] = w_prev[c] + dw;
            if !(w[c] >= fracture::W_MIN) {
                return Err(StepError::Failure {
                    code: FailureCode::EhdInvalid,
                });
            }
        }

        let mut p = vec![0.0; n];
        for (idx, &c) in channel.iter().enumerate() {
            let mut acc = self.materials.sigma0[c] + c_ct_w_tip[idx];
            for (b, &cj) in channel.iter().enumerate() {
                acc += c_cc[(idx, b)] * w[cj];
            }
            if matches!(self.params.regime, config::SolverRegime::VolumeControl) {
                acc += p_uniform;
            }
            p[c] = acc;
        }
        // Tip cells carry the net pressure of their closest channel
        // neighbor; the elasticity coupling at the tip itself is already
        // folded into channel pressures via `c_ct_w_tip`.
        for &t in tip {
            let nb = grid.neighbors(t);
            p[t] = [nb.left, nb.right, nb.bottom, nb.up]
                .iter()
                .filter(|&&n| channel_set.contains_key(&n))
                .map(|&n| p[n])
                .next()
                .unwrap_or(0.0);
        }

        Ok((w, p))
    }
}

impl<'a> StepAttempt for Propagator<'a> {
    fn try_step(&mut self, grid: &Grid, fracture: &Fracture, dt: f64) -> Result<Fracture, StepError> {
        let ribbon = &fracture.partition.ribbon;
        if ribbon.is_empty() {
            // Not yet nucleated: treat as a pure volume-control inflation on
            // the existing footprint with no front motion.
            let crack = fracture.partition.crack();
            let (w, p) = self.solve_width_pressure(
                grid,
                &crack,
                &fracture.partition.channel,
                &fracture.partition.tip,
                &fracture.partition.tip.iter().map(|&t| fracture.w[t]).collect::<Vec<_>>(),
                &fracture.w,
                &fracture.p,
                &fracture.fill_frac,
                dt,
                self.params.injection_rate.value_at(fracture.time),
            )?;
            let mut next = fracture.clone();
            next.w = w;
            next.p = p;
            next.time += dt;
            return Ok(next);
        }

        let mu_prime = self.materials.fluid.mu_prime();
        let ribbon_args: Vec<RibbonArgs> = ribbon
            .iter()
            .map(|&r| RibbonArgs {
                w: fracture.w[r],
                k_prime: self.materials.k_prime[r],
                e_prime: self.materials.e_prime,
                mu_prime,
                c_prime: self.materials.c_prime[r],
                dist_last_ts: fracture.signed_dist[r],
                dt,
            })
            .collect();

        let unsigned_dist = if self.materials.toughness.is_anisotropic() {
            tip_asymptote::toughness_iteration(
                self.params.tip_asymptote,
                &self.materials.toughness,
                grid,
                ribbon,
                &fracture.signed_dist,
                ribbon_args,
                self.params.stagnant_rel_tol,
                self.params.tol_toughness,
                self.params.max_toughness_itr,
            )?
        } else {
            tip_asymptote::invert(self.params.tip_asymptote, &ribbon_args, self.params.stagnant_rel_tol)?
        };

        let region = fast_marching::front_region(grid, &fracture.signed_dist);
        let ribbon_dist: Vec<f64> = unsigned_dist.clone();
        let reinit_sd = fast_marching::reinitialize(grid, &fracture.signed_dist, ribbon, &ribbon_dist, &region);

        let recon = front::reconstruct(grid, &reinit_sd)?;

        let tip_avg_w: Result<Vec<f64>, StepError> = recon
            .tip_geometry
            .iter()
            .zip(recon.partition.tip.iter())
            .map(|(g, &t)| {
                let v = if dt > 0.0 { g.l / dt } else { 0.0 };
                let k_prime_t = if self.materials.toughness.is_anisotropic() {
                    self.materials.toughness.k_prime_at_angle(g.alpha)
                } else {
                    self.materials.k_prime[t]
                };
                let stagnant = tip_asymptote::is_stagnant(
                    k_prime_t,
                    reinit_sd[t],
                    self.materials.e_prime,
                    fracture.w[t],
                    self.params.stagnant_rel_tol,
                );
                let stagnant_k = if stagnant {
                    tip_volume::stress_intensity_fallback(
                        grid,
                        t,
                        &recon.partition.ribbon,
                        &fracture.w,
                        &reinit_sd,
                        self.materials.e_prime,
                    )?
                } else {
                    0.0
                };
                tip_volume::average_width(
                    self.params.tip_asymptote,
                    false,
                    &TipCellInputs {
                        l: g.l,
                        alpha: g.alpha,
                        fill_frac: g.fill_frac,
                        k_prime: k_prime_t,
                        e_prime: self.materials.e_prime,
                        mu_prime,
                        c_prime: self.materials.c_prime[t],
                        v,
                        stagnant,
                        stagnant_k_i_prime: stagnant_k,
                    },
                )
            })
            .collect();
        let tip_avg_w = tip_avg_w?;

        let fill_frac: Vec<f64> = recon.tip_geometry.iter().map(|g| g.fill_frac).collect();

        let (w, p) = self.solve_width_pressure(
            grid,
            &recon.partition.crack(),
            &recon.partition.channel,
            &recon.partition.tip,
            &tip_avg_w,
            &fracture.w,
            &fracture.p,
            &fill_frac,
            dt,
            self.params.injection_rate.value_at(fracture.time),
        )?;

        let mut next = Fracture::new(grid.num_cells(), mu_prime);
        next.w = w;
        next.p = p;
        next.signed_dist = reinit_sd;
        next.fill_frac = fill_frac;
        next.alpha = recon.tip_geometry.iter().map(|g| g.alpha).collect();
        next.l = recon.tip_geometry.iter().map(|g| g.l).collect();
        next.zero_vertex = recon.tip_geometry.iter().map(|g| g.zero_vertex).collect();
        next.v = recon.tip_geometry.iter().map(|g| if dt > 0.0 { g.l / dt } else { 0.0 }).collect();
        next.mu_prime = vec![mu_prime; grid.num_cells()];
        next.partition = recon.partition;
        next.time = fracture.time + dt;
        next.volume = next.w.iter().sum::<f64>() * grid.cell_area;
        next.regime = if self.params.save_regime {
            Some(vec![0.0; next.partition.ribbon.len()])
        } else {
            None
        };

        Ok(next)
    }
}

/// Advance `fracture` by one controller step against `grid`, independent of
/// the wasm-bindgen host surface. `FractureEngine::advance` delegates here;
/// this is also the entry point for driving the engine from native Rust
/// (e.g. seeding a fracture state directly rather than through the host's
/// nucleation code, which stays outside this crate).
pub fn advance_fracture(
    grid: &mut Grid,
    fracture: &mut Fracture,
    params: &SimulationParameters,
    materials: &MaterialProperties,
    elasticity: &mut ElasticityMatrix,
    stepper: &mut TimeStepper,
    prev_dt: f64,
) -> error::EngineResult<f64> {
    let mut propagator = Propagator {
        materials,
        elasticity,
        params,
    };
    stepper.advance(&mut propagator, grid, fracture, params, prev_dt)
}

#[wasm_bindgen]
pub struct FractureEngine {
    grid: Grid,
    fracture: Fracture,
    params: SimulationParameters,
    elasticity: ElasticityMatrix,
    materials: Option<MaterialProperties>,
    stepper: TimeStepper,
    last_dt: f64,
    last_status: u8,
}

#[wasm_bindgen]
impl FractureEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(lx: f64, ly: f64, nx: usize, ny: usize, e_prime: f64) -> FractureEngine {
        let params = SimulationParameters::default();
        let grid = Grid::new(lx, ly, nx, ny, params.symmetric);
        let elasticity = ElasticityMatrix::assemble(&grid, e_prime);
        let fracture = Fracture::new(grid.num_cells(), 0.0);
        let stepper = TimeStepper::new(&params);
        FractureEngine {
            grid,
            fracture,
            params,
            elasticity,
            materials: None,
            stepper,
            last_dt: params_initial_dt(),
            last_status: FailureCode::NotAttempted as u8,
        }
    }

    /// Configure isotropic rock/fluid properties over the current mesh:
    /// uniform toughness, confining stress and leakoff, plus the fluid's
    /// viscosity/density/compressibility.
    pub fn set_material_uniform(
        &mut self,
        toughness_k1c: f64,
        sigma0: f64,
        leakoff_c: f64,
        viscosity: f64,
        density: f64,
        compressibility: f64,
        turbulent: bool,
    ) {
        let toughness = materials::ToughnessModel::Isotropic(Box::new(move |_x, _y| toughness_k1c));
        let confining: materials::ConfiningStress = Box::new(move |_x, _y| sigma0);
        let leakoff: materials::Leakoff = Box::new(move |_x, _y| leakoff_c);
        let fluid = materials::FluidModel {
            viscosity,
            density,
            compressibility,
            turbulent,
            grain_size: 0.0,
        };
        self.materials = Some(MaterialProperties::sample(
            &self.grid,
            self.elasticity.e_prime,
            toughness,
            confining,
            leakoff,
            fluid,
        ));
    }

    #[wasm_bindgen(js_name = setRegime)]
    pub fn set_regime(&mut self, regime: &str) -> Result<(), String> {
        self.params.regime = match regime {
            "volumeControl" => config::SolverRegime::VolumeControl,
            "viscousInjection" => config::SolverRegime::ViscousInjection,
            "dryCrack_mechLoading" => config::SolverRegime::DryCrackMechLoading,
            other => return Err(format!("unknown regime '{other}'")),
        };
        Ok(())
    }

    /// Set a constant injection rate Q (m^3/s) into the center cell, active
    /// from the current time onward.
    #[wasm_bindgen(js_name = setInjectionRate)]
    pub fn set_injection_rate(&mut self, q: f64) {
        self.params.injection_rate = config::Schedule::constant(q);
    }

    /// Advance the simulation by one controller step, internally reattempting
    /// on recoverable failure and remeshing on reached-end-of-grid.
    /// Returns the failure code (`1` = success)
    pub fn advance(&mut self) -> Result<u8, String> {
        let materials = self
            .materials
            .take()
            .ok_or_else(|| "material properties not configured".to_string())?;

        let result = advance_fracture(
            &mut self.grid,
            &mut self.fracture,
            &self.params,
            &materials,
            &mut self.elasticity,
            &mut self.stepper,
            self.last_dt,
        );

        self.materials = Some(materials);

        match result {
            Ok(dt) => {
                self.last_dt = dt;
                self.last_status = FailureCode::Success as u8;
                Ok(self.last_status)
            }
            Err(EngineError::Step(e)) => {
                self.last_status = e.code().code();
                Ok(self.last_status)
            }
            Err(other) => Err(other.to_string()),
        }
    }

    #[wasm_bindgen(js_name = getTime)]
    pub fn get_time(&self) -> f64 {
        self.fracture.time
    }

    #[wasm_bindgen(js_name = getVolume)]
    pub fn get_volume(&self) -> f64 {
        self.fracture.volume
    }

    #[wasm_bindgen(js_name = getFractureState)]
    pub fn get_fracture_state(&self) -> JsValue {
        serde_wasm_bindgen::to_value(&self.fracture).unwrap_or(JsValue::NULL)
    }

    #[wasm_bindgen(js_name = getLastStatus)]
    pub fn get_last_status(&self) -> u8 {
        self.last_status
    }
}

fn params_initial_dt() -> f64 {
    1e-3
}
