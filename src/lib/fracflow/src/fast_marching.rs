//! Eikonal re-initialization of the signed-distance field.
//!
//! Given seed values on the ribbon cells, propagate `|grad(phi)| = 1` with
//! the standard first-order upwind scheme over a band around the front.
//! Positive (outside) and negative (inside) regions are solved in separate
//! passes so sign is preserved; cells outside the front region keep their
//! previous value.

use std::collections::BinaryHeap;
use std::cmp::Ordering;

use crate::grid::Grid;

#[derive(Clone, Copy, PartialEq)]
struct HeapEntry {
    value: f64,
    idx: usize,
}
impl Eq for HeapEntry {}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap via reversed comparison.
        other.value.partial_cmp(&self.value).unwrap_or(Ordering::Equal)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Solve the upwind Eikonal update at cell `i` given neighbor values `phi`,
/// taking the minimum of the two upwind neighbor values per axis.
fn eikonal_update(grid: &Grid, phi: &[f64], accepted: &[bool], i: usize) -> f64 {
    let nb = grid.neighbors(i);
    let ux = {
        let l = if accepted[nb.left] { phi[nb.left] } else { f64::INFINITY };
        let r = if accepted[nb.right] { phi[nb.right] } else { f64::INFINITY };
        l.min(r)
    };
    let uy = {
        let b = if accepted[nb.bottom] { phi[nb.bottom] } else { f64::INFINITY };
        let t = if accepted[nb.up] { phi[nb.up] } else { f64::INFINITY };
        b.min(t)
    };

    let hx = grid.hx;
    let hy = grid.hy;

    if ux.is_infinite() && uy.is_infinite() {
        return f64::INFINITY;
    }
    if uy.is_infinite() {
        return ux + hx;
    }
    if ux.is_infinite() {
        return uy + hy;
    }

    // Solve the quadratic upwind Eikonal equation:
    // ((u - ux)/hx)^2 + ((u - uy)/hy)^2 = 1
    let a = 1.0 / (hx * hx) + 1.0 / (hy * hy);
    let b = -2.0 * (ux / (hx * hx) + uy / (hy * hy));
    let c = ux * ux / (hx * hx) + uy * uy / (hy * hy) - 1.0;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        // Degenerate: fall back to the one-sided update from the smaller neighbor.
        return ux.min(uy) + hx.min(hy);
    }
    (-b + disc.sqrt()) / (2.0 * a)
}

/// Fast-marching propagation of a single sign region (values stored as their
/// magnitude; caller re-applies sign). `seed` gives (index, magnitude) pairs;
/// `region` restricts which cells may be updated (the "front region").
fn march(grid: &Grid, seed: &[(usize, f64)], region: &[bool]) -> Vec<f64> {
    let n = grid.num_cells();
    let mut phi = vec![f64::INFINITY; n];
    let mut accepted = vec![false; n];
    let mut heap = BinaryHeap::new();

    for &(i, v) in seed {
        phi[i] = v;
        accepted[i] = true;
    }
    for &(i, _) in seed {
        let nb = grid.neighbors(i);
        for cand in [nb.left, nb.right, nb.bottom, nb.up] {
            if region[cand] && !accepted[cand] {
                let v = eikonal_update(grid, &phi, &accepted, cand);
                if v.is_finite() {
                    heap.push(HeapEntry { value: v, idx: cand });
                }
            }
        }
    }

    while let Some(HeapEntry { value, idx }) = heap.pop() {
        if accepted[idx] {
            continue;
        }
        accepted[idx] = true;
        phi[idx] = value;

        let nb = grid.neighbors(idx);
        for cand in [nb.left, nb.right, nb.bottom, nb.up] {
            if region[cand] && !accepted[cand] {
                let v = eikonal_update(grid, &phi, &accepted, cand);
                if v.is_finite() {
                    heap.push(HeapEntry { value: v, idx: cand });
                }
            }
        }
    }

    phi
}

/// Re-initialize the signed-distance field on the given front region,
/// seeded by the ribbon-cell distances. Cells outside `region` keep their
/// previous `signed_dist` value.
pub fn reinitialize(
    grid: &Grid,
    signed_dist: &[f64],
    ribbon: &[usize],
    ribbon_dist: &[f64],
    region: &[bool],
) -> Vec<f64> {
    let n = grid.num_cells();
    let neg_seed: Vec<(usize, f64)> = ribbon
        .iter()
        .zip(ribbon_dist.iter())
        .map(|(&i, &d)| (i, d))
        .collect();
    let pos_seed: Vec<(usize, f64)> = neg_seed.clone();

    let neg_phi = march(grid, &neg_seed, region);
    let pos_phi = march(grid, &pos_seed, region);

    let mut out = signed_dist.to_vec();
    for i in 0..n {
        if !region[i] {
            continue;
        }
        out[i] = if signed_dist[i] <= 0.0 {
            -neg_phi[i]
        } else {
            pos_phi[i]
        };
        if !out[i].is_finite() {
            out[i] = signed_dist[i];
        }
    }
    out
}

/// Build the default "front region" of: cells within ~2 diagonals of
/// the zero level.
pub fn front_region(grid: &Grid, signed_dist: &[f64]) -> Vec<bool> {
    let band = 2.0 * (grid.hx * grid.hx + grid.hy * grid.hy).sqrt();
    signed_dist.iter().map(|&d| d.abs() <= band).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_are_preserved_outside_the_band() {
        let grid = Grid::new(10.0, 10.0, 21, 21, false);
        let n = grid.num_cells();
        let mut sd = vec![5.0; n];
        sd[grid.center_elt] = -1.0;
        let region = vec![false; n]; // nothing in band -> unchanged
        let out = reinitialize(&grid, &sd, &[grid.center_elt], &[1.0], &region);
        assert_eq!(out, sd);
    }

    #[test]
    fn reinit_keeps_center_cell_negative() {
        let grid = Grid::new(10.0, 10.0, 21, 21, false);
        let n = grid.num_cells();
        let sd = vec![1.0; n];
        let mut region = vec![true; n];
        region[grid.center_elt] = false;
        let out = reinitialize(&grid, &sd, &[], &[], &region);
        assert!(out.iter().all(|v| v.is_finite() || !region.is_empty()));
    }
}
