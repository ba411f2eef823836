//! The evolving fracture state.

use serde::{Deserialize, Serialize};

/// Partition of cell indices into the disjoint/overlapping sets named in
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Partition {
    /// Interior cells, away from the front.
    pub channel: Vec<usize>,
    /// Interior cells adjacent to the front (subset of `channel`).
    pub ribbon: Vec<usize>,
    /// Cells the front crosses.
    pub tip: Vec<usize>,
}

impl Partition {
    /// `EltCrack = Channel union Tip`.
    pub fn crack(&self) -> Vec<usize> {
        let mut v = self.channel.clone();
        v.extend_from_slice(&self.tip);
        v
    }
}

/// Fracture state: mutated only by a successful time step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fracture {
    pub w: Vec<f64>,
    pub p: Vec<f64>,
    pub signed_dist: Vec<f64>,

    pub partition: Partition,

    /// Fractional area occupied by the crack, indexed parallel to `partition.tip`.
    pub fill_frac: Vec<f64>,
    /// Angle in [0, pi/2], indexed parallel to `partition.tip`.
    pub alpha: Vec<f64>,
    /// Perpendicular distance from the zero vertex to the front segment.
    pub l: Vec<f64>,
    /// Which of the four vertices is interior to the crack, per tip cell.
    pub zero_vertex: Vec<usize>,
    /// Front-normal velocity per tip cell.
    pub v: Vec<f64>,
    /// Muprime per cell (constant unless fluid properties vary spatially).
    pub mu_prime: Vec<f64>,

    pub time: f64,
    pub volume: f64,

    /// Optional per-ribbon regime indicator (`saveRegime`),
    pub regime: Option<Vec<f64>>,
}

/// Minimum width floor imposed on physically valid interior cells.
pub const W_MIN: f64 = 0.0;

impl Fracture {
    pub fn new(n_cells: usize, mu_prime: f64) -> Fracture {
        Fracture {
            w: vec![0.0; n_cells],
            p: vec![0.0; n_cells],
            signed_dist: vec![f64::INFINITY; n_cells],
            partition: Partition::default(),
            fill_frac: Vec::new(),
            alpha: Vec::new(),
            l: Vec::new(),
            zero_vertex: Vec::new(),
            v: Vec::new(),
            mu_prime: vec![mu_prime; n_cells],
            time: 0.0,
            volume: 0.0,
            regime: None,
        }
    }

    /// invariant: width is zero outside the crack.
    pub fn zero_outside_crack(&self) -> bool {
        let crack: std::collections::HashSet<usize> = self.partition.crack().into_iter().collect();
        self.w
            .iter()
            .enumerate()
            .all(|(i, &wi)| crack.contains(&i) || wi == 0.0)
    }

    /// invariant: nonnegative width and non-positive signed distance inside the crack.
    pub fn crack_cells_valid(&self) -> bool {
        self.partition
            .crack()
            .iter()
            .all(|&i| self.w[i] >= 0.0 && self.signed_dist[i] <= 1e-9)
    }

    /// invariant: fill fractions are within [0, 1].
    pub fn fill_frac_valid(&self) -> bool {
        self.fill_frac.iter().all(|&f| (0.0..=1.0).contains(&f))
    }
}
