//! Optional four-way symmetric folding of the grid to a single quadrant.
//! The grid's `symmetry_map` already carries (canonical, weight) per cell;
//! this module provides the vector fold/unfold helpers used by the EHD
//! assembly when `symmetric = true`.

use crate::grid::Grid;

/// Fold a full-grid vector down to one entry per quadrant representative,
/// taking the representative's own value (folding assumes the field is
/// already symmetric, e.g. widths/pressures under a symmetric problem).
pub fn fold(grid: &Grid, reps: &[usize], full: &[f64]) -> Vec<f64> {
    reps.iter().map(|&r| full[r]).collect()
}

/// Expand a reduced (one-per-representative) vector back to full-grid size
/// by broadcasting each representative's value to every cell mapped to it.
pub fn unfold(grid: &Grid, reps: &[usize], reduced: &[f64]) -> Vec<f64> {
    let mut rep_index = std::collections::HashMap::new();
    for (idx, &r) in reps.iter().enumerate() {
        rep_index.insert(r, idx);
    }
    grid.symmetry_map
        .iter()
        .map(|m| reduced[rep_index[&m.canonical]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_unfold_roundtrips_on_symmetric_field() {
        let grid = Grid::new(5.0, 5.0, 9, 9, true);
        let reps: Vec<usize> = (0..grid.num_cells())
            .filter(|&i| grid.symmetry_map[i].canonical == i)
            .collect();
        let full: Vec<f64> = grid
            .center_coor
            .iter()
            .map(|&(x, y)| x.abs() + y.abs())
            .collect();
        let reduced = fold(&grid, &reps, &full);
        let restored = unfold(&grid, &reps, &reduced);
        for i in 0..grid.num_cells() {
            let canon = grid.symmetry_map[i].canonical;
            assert!((restored[i] - full[canon]).abs() < 1e-9);
        }
    }
}
