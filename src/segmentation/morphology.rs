//! Binary morphology on 2D rasters with 4-connectivity.

use std::collections::VecDeque;

use ndarray::{Array2, ArrayView2};

use crate::model::BoundingBox;

/// 4-neighbours of `(r, c)` inside a raster of shape `(rows, cols)`.
#[inline]
fn n4(
    (r, c): (usize, usize),
    (rows, cols): (usize, usize),
) -> impl Iterator<Item = (usize, usize)> {
    [
        (r.wrapping_sub(1), c),
        (r + 1, c),
        (r, c.wrapping_sub(1)),
        (r, c + 1),
    ]
    .into_iter()
    .filter(move |&(nr, nc)| nr < rows && nc < cols)
}

/// Label the 4-connected components of `mask`.
///
/// Components are numbered from 1 in row-major order of their first pixel;
/// background is 0. Returns the label raster and the number of components.
pub fn label_components(mask: ArrayView2<'_, bool>) -> (Array2<u32>, u32) {
    let shape = mask.dim();
    let mut labels = Array2::<u32>::zeros(shape);
    let mut count = 0;
    let mut queue = VecDeque::with_capacity(16);

    for ((r, c), &set) in mask.indexed_iter() {
        if !set || labels[[r, c]] != 0 {
            continue;
        }
        count += 1;
        labels[[r, c]] = count;
        queue.push_back((r, c));
        while let Some(cur) = queue.pop_front() {
            for (nr, nc) in n4(cur, shape) {
                if mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                    labels[[nr, nc]] = count;
                    queue.push_back((nr, nc));
                }
            }
        }
    }
    (labels, count)
}

/// Pixel count of every label `1..=count`; index 0 holds the background.
pub fn component_areas(labels: ArrayView2<'_, u32>, count: u32) -> Vec<usize> {
    let mut areas = vec![0usize; count as usize + 1];
    for &l in labels.iter() {
        if let Some(a) = areas.get_mut(l as usize) {
            *a += 1;
        }
    }
    areas
}

/// Bounding box of every label `1..=count`, in one pass; entry `i` belongs
/// to label `i + 1`.
pub fn label_boxes(labels: ArrayView2<'_, u32>, count: u32) -> Vec<Option<BoundingBox>> {
    let mut boxes: Vec<Option<BoundingBox>> = vec![None; count as usize];
    for ((r, c), &l) in labels.indexed_iter() {
        let Some(slot) = (l as usize).checked_sub(1).and_then(|i| boxes.get_mut(i)) else {
            continue;
        };
        *slot = Some(match *slot {
            None => BoundingBox::new(r, r + 1, c, c + 1),
            Some(b) => BoundingBox::new(
                b.row_start.min(r),
                b.row_end.max(r + 1),
                b.col_start.min(c),
                b.col_end.max(c + 1),
            ),
        });
    }
    boxes
}

/// Dilate by one pixel with a cross-shaped structuring element.
pub fn dilate_cross(mask: ArrayView2<'_, bool>) -> Array2<bool> {
    let shape = mask.dim();
    let mut out = mask.to_owned();
    for ((r, c), &set) in mask.indexed_iter() {
        if set {
            for (nr, nc) in n4((r, c), shape) {
                out[[nr, nc]] = true;
            }
        }
    }
    out
}

/// Fill background regions that do not touch the raster border.
pub fn fill_holes(mask: ArrayView2<'_, bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut outside = Array2::from_elem((rows, cols), false);
    let mut queue: VecDeque<(usize, usize)> = mask
        .indexed_iter()
        .filter_map(|((r, c), &set)| {
            let border = r == 0 || c == 0 || r + 1 == rows || c + 1 == cols;
            (border && !set).then_some((r, c))
        })
        .collect();
    for &(r, c) in &queue {
        outside[[r, c]] = true;
    }

    while let Some(cur) = queue.pop_front() {
        for (nr, nc) in n4(cur, (rows, cols)) {
            if !mask[[nr, nc]] && !outside[[nr, nc]] {
                outside[[nr, nc]] = true;
                queue.push_back((nr, nc));
            }
        }
    }
    outside.mapv(|o| !o)
}
