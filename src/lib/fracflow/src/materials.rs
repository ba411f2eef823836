//! Host-supplied material closures. These are the
//! only interface the engine expects from its embedder for rock/fluid
//! properties; config/persistence/plotting remain out of scope.

use std::f64::consts::PI;

/// Toughness model: either a function of position or, in anisotropic mode,
/// a function of the tip-propagation angle.
pub enum ToughnessModel {
    Isotropic(Box<dyn Fn(f64, f64) -> f64 + Send + Sync>),
    Anisotropic(Box<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl ToughnessModel {
    pub fn is_anisotropic(&self) -> bool {
        matches!(self, ToughnessModel::Anisotropic(_))
    }

    /// Scaled toughness K' = sqrt(32/pi) * K_Ic, sampled by position.
    pub fn k_prime_at(&self, x: f64, y: f64) -> f64 {
        match self {
            ToughnessModel::Isotropic(f) => (32.0 / PI).sqrt() * f(x, y),
            ToughnessModel::Anisotropic(_) => {
                panic!("k_prime_at called on an anisotropic toughness model; use k_prime_at_angle")
            }
        }
    }

    /// Scaled toughness K' = sqrt(32/pi) * K_Ic, sampled by angle (anisotropic mode).
    pub fn k_prime_at_angle(&self, alpha: f64) -> f64 {
        match self {
            ToughnessModel::Anisotropic(f) => (32.0 / PI).sqrt() * f(alpha),
            ToughnessModel::Isotropic(f) => (32.0 / PI).sqrt() * f(0.0, 0.0),
        }
    }
}

/// Confining stress closure sigma_0(x, y), sampled once per mesh at cell centers.
pub type ConfiningStress = Box<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Leak-off closure C(x, y); the engine uses C' = 2C.
pub type Leakoff = Box<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Fluid properties: the engine scales mu' = 12*mu.
#[derive(Clone, Copy, Debug)]
pub struct FluidModel {
    pub viscosity: f64,
    pub density: f64,
    pub compressibility: f64,
    pub turbulent: bool,
    pub grain_size: f64,
}

impl FluidModel {
    pub fn mu_prime(&self) -> f64 {
        12.0 * self.viscosity
    }
}

/// Per-mesh sampled material properties (evaluated once per grid).
pub struct MaterialProperties {
    pub e_prime: f64,
    pub k_prime: Vec<f64>,
    pub sigma0: Vec<f64>,
    pub c_prime: Vec<f64>,
    pub toughness: ToughnessModel,
    pub fluid: FluidModel,
}

impl MaterialProperties {
    pub fn sample(
        grid: &crate::grid::Grid,
        e_prime: f64,
        toughness: ToughnessModel,
        confining_stress: ConfiningStress,
        leakoff: Leakoff,
        fluid: FluidModel,
    ) -> MaterialProperties {
        let n = grid.num_cells();
        let mut k_prime = Vec::with_capacity(n);
        let mut sigma0 = Vec::with_capacity(n);
        let mut c_prime = Vec::with_capacity(n);
        for &(x, y) in &grid.center_coor {
            k_prime.push(if toughness.is_anisotropic() {
                0.0 // resolved per-cell by angle at ribbon/tip time; see tip_asymptote::toughness_iteration
            } else {
                toughness.k_prime_at(x, y)
            });
            sigma0.push(confining_stress(x, y));
            c_prime.push(2.0 * leakoff(x, y));
        }
        MaterialProperties {
            e_prime,
            k_prime,
            sigma0,
            c_prime,
            toughness,
            fluid,
        }
    }
}
