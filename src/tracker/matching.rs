//! Similarity scores and bipartite assignment between labelled rasters.

use ndarray::{Array2, ArrayView2};

use crate::{Result, TrackingError};

/// Cost given to padding cells of the square assignment matrix.
const PAD_COST: f64 = 1e6;

/// Cost difference under which two assignments count as equally good.
const TIE_TOLERANCE: f64 = 1e-9;

/// Pairwise pseudo-Jaccard between the labels of two rasters.
///
/// Entry `[i, j]` is `|A ∩ B| / |A ∪ B|` for label `i + 1` of `a` and label
/// `j + 1` of `b`, counted in a single pass over both rasters. Labels above
/// `count_a` / `count_b` are ignored.
pub fn pseudo_jaccard(
    a: ArrayView2<'_, u32>,
    count_a: u32,
    b: ArrayView2<'_, u32>,
    count_b: u32,
) -> Result<Array2<f64>> {
    if a.dim() != b.dim() {
        return Err(TrackingError::Shape(format!(
            "cannot compare label rasters of shapes {:?} and {:?}",
            a.dim(),
            b.dim()
        )));
    }
    let (na, nb) = (count_a as usize, count_b as usize);
    let mut inter = Array2::<u64>::zeros((na + 1, nb + 1));
    for (&la, &lb) in a.iter().zip(b.iter()) {
        let (la, lb) = (la as usize, lb as usize);
        if la <= na && lb <= nb {
            inter[[la, lb]] += 1;
        }
    }
    let area_a: Vec<u64> = inter.rows().into_iter().map(|r| r.sum()).collect();
    let area_b: Vec<u64> = inter.columns().into_iter().map(|c| c.sum()).collect();

    Ok(Array2::from_shape_fn((na, nb), |(i, j)| {
        let both = inter[[i + 1, j + 1]];
        let union = area_a[i + 1] + area_b[j + 1] - both;
        if union > 0 {
            both as f64 / union as f64
        } else {
            0.0
        }
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentResult {
    /// Accepted `(row, col, similarity)` triples, in row order
    pub matches: Vec<(usize, usize, f64)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
}

/// Optimal one-to-one assignment maximising total similarity.
///
/// Solves the minimum-cost problem on `1 - similarity`, padded to a square
/// matrix, and keeps only pairs whose similarity is strictly above
/// `min_similarity`. Among equally good assignments, lower rows take lower
/// columns.
pub fn linear_assignment(
    similarity: &Array2<f64>,
    min_similarity: f64,
) -> Result<AssignmentResult> {
    let (num_rows, num_cols) = similarity.dim();

    if num_rows == 0 || num_cols == 0 {
        return Ok(AssignmentResult {
            matches: vec![],
            unmatched_rows: (0..num_rows).collect(),
            unmatched_cols: (0..num_cols).collect(),
        });
    }

    if let Some(bad) = similarity.iter().find(|s| !s.is_finite()) {
        return Err(TrackingError::Assignment(format!(
            "similarity must be finite, got {bad}"
        )));
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), PAD_COST);
    for ((i, j), &sim) in similarity.indexed_iter() {
        padded[[i, j]] = 1.0 - sim;
    }
    let mut row_to_col = if size == 1 {
        vec![0]
    } else {
        let (row_to_col, _) = lapjv::lapjv(&padded).map_err(|_| {
            TrackingError::Assignment(format!("solver failed on a {size}x{size} cost matrix"))
        })?;
        row_to_col
    };
    prefer_lowest_index(&padded, &mut row_to_col);

    let mut matches = vec![];
    let mut unmatched_rows = vec![];
    let mut col_free = vec![true; num_cols];
    for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
        if col < num_cols && similarity[[row, col]] > min_similarity {
            matches.push((row, col, similarity[[row, col]]));
            col_free[col] = false;
        } else {
            unmatched_rows.push(row);
        }
    }

    let unmatched_cols = col_free
        .iter()
        .enumerate()
        .filter_map(|(j, &free)| free.then_some(j))
        .collect();

    Ok(AssignmentResult {
        matches,
        unmatched_rows,
        unmatched_cols,
    })
}

/// Exchange the columns of two rows whenever that costs no more and gives
/// the lower row the lower column. Each exchange removes an inversion, so
/// the loop terminates.
fn prefer_lowest_index(cost: &Array2<f64>, row_to_col: &mut [usize]) {
    let n = row_to_col.len();
    loop {
        let mut exchanged = false;
        for r1 in 0..n {
            for r2 in r1 + 1..n {
                let (c1, c2) = (row_to_col[r1], row_to_col[r2]);
                if c1 < c2 {
                    continue;
                }
                let current = cost[[r1, c1]] + cost[[r2, c2]];
                let swapped = cost[[r1, c2]] + cost[[r2, c1]];
                if swapped <= current + TIE_TOLERANCE {
                    row_to_col.swap(r1, r2);
                    exchanged = true;
                }
            }
        }
        if !exchanged {
            break;
        }
    }
}
