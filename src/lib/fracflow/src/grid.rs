use serde::{Deserialize, Serialize};

/// Vertex ordering convention: {BL, BR, TR, TL} going counter-clockwise from the
/// bottom-left corner of a cell.
pub const BL: usize = 0;
pub const BR: usize = 1;
pub const TR: usize = 2;
pub const TL: usize = 3;

/// Neighbor ordering convention: {left, right, bottom, up}.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbors {
    pub left: usize,
    pub right: usize,
    pub bottom: usize,
    pub up: usize,
}

impl Neighbors {
    pub fn as_array(&self) -> [usize; 4] {
        [self.left, self.right, self.bottom, self.up]
    }
}

/// The canonical quadrant representative and multiplicity weight for a cell
/// under four-way (x-axis and y-axis) symmetric folding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetryMap {
    pub canonical: usize,
    pub weight: u8,
}

/// An immutable uniform rectangular grid: cell/vertex topology, neighbor
/// lookup, point location and the optional symmetric-folding map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Grid {
    pub lx: f64,
    pub ly: f64,
    pub nx: usize,
    pub ny: usize,
    pub hx: f64,
    pub hy: f64,
    pub cell_area: f64,

    pub center_coor: Vec<(f64, f64)>,
    pub vertex_coor: Vec<(f64, f64)>,
    /// Four vertex indices per cell, in {BL, BR, TR, TL} order.
    pub connectivity: Vec<[usize; 4]>,
    /// Four neighbor indices per cell, in {left, right, bottom, up} order.
    /// Boundary cells carry themselves as the neighbor (no-flux sentinel).
    pub nei_elements: Vec<Neighbors>,

    pub center_elt: usize,

    pub symmetric: bool,
    /// Populated only when `symmetric` is true: one entry per cell.
    pub symmetry_map: Vec<SymmetryMap>,
}

impl Grid {
    /// Build a uniform Cartesian mesh centered at the origin, spanning
    /// `[-Lx,Lx] x [-Ly,Ly]`. Even cell counts are incremented by one so the
    /// origin always sits at a cell center.
    pub fn new(lx: f64, ly: f64, nx: usize, ny: usize, symmetric: bool) -> Grid {
        let nx = if nx % 2 == 0 { nx + 1 } else { nx };
        let ny = if ny % 2 == 0 { ny + 1 } else { ny };

        let hx = 2.0 * lx / (nx as f64 - 1.0);
        let hy = 2.0 * ly / (ny as f64 - 1.0);
        let cell_area = hx * hy;

        let n = nx * ny;
        let mut center_coor = Vec::with_capacity(n);
        for j in 0..ny {
            for i in 0..nx {
                let x = -lx + i as f64 * hx;
                let y = -ly + j as f64 * hy;
                center_coor.push((x, y));
            }
        }

        // Vertices live on a (nx+1) x (ny+1) lattice offset by half a cell.
        let vnx = nx + 1;
        let vny = ny + 1;
        let mut vertex_coor = Vec::with_capacity(vnx * vny);
        for j in 0..vny {
            for i in 0..vnx {
                let x = -lx - hx / 2.0 + i as f64 * hx;
                let y = -ly - hy / 2.0 + j as f64 * hy;
                vertex_coor.push((x, y));
            }
        }
        let vertex_idx = |i: usize, j: usize| j * vnx + i;

        let mut connectivity = Vec::with_capacity(n);
        let mut nei_elements = Vec::with_capacity(n);
        let cell_idx = |i: usize, j: usize| j * nx + i;
        for j in 0..ny {
            for i in 0..nx {
                let id = cell_idx(i, j);
                connectivity.push([
                    vertex_idx(i, j),
                    vertex_idx(i + 1, j),
                    vertex_idx(i + 1, j + 1),
                    vertex_idx(i, j + 1),
                ]);

                let left = if i > 0 { cell_idx(i - 1, j) } else { id };
                let right = if i + 1 < nx { cell_idx(i + 1, j) } else { id };
                let bottom = if j > 0 { cell_idx(i, j - 1) } else { id };
                let up = if j + 1 < ny { cell_idx(i, j + 1) } else { id };
                nei_elements.push(Neighbors { left, right, bottom, up });
            }
        }

        let center_elt = cell_idx(nx / 2, ny / 2);

        let symmetry_map = if symmetric {
            Self::build_symmetry_map(nx, ny, &center_coor, center_elt)
        } else {
            Vec::new()
        };

        Grid {
            lx,
            ly,
            nx,
            ny,
            hx,
            hy,
            cell_area,
            center_coor,
            vertex_coor,
            connectivity,
            nei_elements,
            center_elt,
            symmetric,
            symmetry_map,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.nx * self.ny
    }

    #[inline]
    pub fn neighbors(&self, i: usize) -> Neighbors {
        self.nei_elements[i]
    }

    /// Locate the cell containing `(x, y)`, or `None` if outside the grid.
    pub fn locate(&self, x: f64, y: f64) -> Option<usize> {
        if x < -self.lx - self.hx / 2.0
            || x > self.lx + self.hx / 2.0
            || y < -self.ly - self.hy / 2.0
            || y > self.ly + self.hy / 2.0
        {
            return None;
        }
        let i = ((x + self.lx) / self.hx + 0.5).floor();
        let j = ((y + self.ly) / self.hy + 0.5).floor();
        if i < 0.0 || j < 0.0 {
            return None;
        }
        let (i, j) = (i as usize, j as usize);
        if i >= self.nx || j >= self.ny {
            return None;
        }
        Some(j * self.nx + i)
    }

    /// Build the quadrant-folding map: each cell maps to the representative
    /// cell in the first quadrant (x >= 0, y >= 0) plus a multiplicity weight
    /// in {1, 2, 4}. The center cell and the two axis rows carry weight 1/2
    /// in the underlying fold but the spec's weight set is {1,2,4}; axis cells
    /// (one coordinate zero, the other not) get weight 2, the center gets
    /// weight 1, and generic interior cells get weight 4.
    fn build_symmetry_map(
        nx: usize,
        ny: usize,
        center_coor: &[(f64, f64)],
        center_elt: usize,
    ) -> Vec<SymmetryMap> {
        let n = nx * ny;
        let mut map = vec![
            SymmetryMap {
                canonical: 0,
                weight: 1
            };
            n
        ];
        let cell_idx = |i: usize, j: usize| j * nx + i;
        let ic0 = center_elt % nx;
        let jc0 = center_elt / nx;

        for j in 0..ny {
            for i in 0..nx {
                let id = cell_idx(i, j);
                // Reflect (i, j) into the first quadrant relative to the center cell.
                let ri = if i >= ic0 { i } else { 2 * ic0 - i };
                let rj = if j >= jc0 { j } else { 2 * jc0 - j };
                let canonical = cell_idx(ri.min(nx - 1), rj.min(ny - 1));

                let on_x_axis = (center_coor[id].1).abs() < 1e-12;
                let on_y_axis = (center_coor[id].0).abs() < 1e-12;
                let weight = if id == center_elt {
                    1
                } else if on_x_axis || on_y_axis {
                    2
                } else {
                    4
                };
                map[id] = SymmetryMap { canonical, weight };
            }
        }
        map
    }

    /// Remesh uniformly by doubling (or scaling by `factor`) the domain
    /// extents while keeping the same cell counts.
    pub fn remesh(&self, factor: f64) -> Grid {
        Grid::new(self.lx * factor, self.ly * factor, self.nx, self.ny, self.symmetric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_counts_are_incremented() {
        let g = Grid::new(10.0, 10.0, 10, 10, false);
        assert_eq!(g.nx, 11);
        assert_eq!(g.ny, 11);
    }

    #[test]
    fn origin_is_a_single_cell_center() {
        let g = Grid::new(10.0, 10.0, 11, 11, false);
        let (x, y) = g.center_coor[g.center_elt];
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);
    }

    #[test]
    fn boundary_cells_are_self_neighbors() {
        let g = Grid::new(10.0, 10.0, 5, 5, false);
        let n = g.neighbors(0);
        assert_eq!(n.left, 0);
        assert_eq!(n.bottom, 0);
    }

    #[test]
    fn locate_roundtrips_cell_centers() {
        let g = Grid::new(10.0, 10.0, 11, 11, false);
        for (id, &(x, y)) in g.center_coor.iter().enumerate() {
            assert_eq!(g.locate(x, y), Some(id));
        }
    }

    #[test]
    fn symmetry_weights_are_in_allowed_set() {
        let g = Grid::new(10.0, 10.0, 11, 11, true);
        for m in &g.symmetry_map {
            assert!(m.weight == 1 || m.weight == 2 || m.weight == 4);
        }
    }
}
