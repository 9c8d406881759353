//! Unstructured association edges and the structured tracks compiled from them.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a cell: frame index plus index in that frame's cell list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub frame_index: usize,
    pub cell_index: usize,
}

impl CellRef {
    #[inline]
    pub fn new(frame_index: usize, cell_index: usize) -> Self {
        Self {
            frame_index,
            cell_index,
        }
    }
}

/// One accepted predecessor/successor association.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnstructuredEdge {
    pub prev: CellRef,
    pub next: CellRef,
    /// Frame index of `prev`
    pub frame_index: usize,
    pub affinity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub usize);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A time-ordered chain of cells sharing lineage.
///
/// A daughter track produced by a division starts with the shared parent
/// cell, so both daughters are rooted at the same parent edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: TrackId,
    parent: Option<TrackId>,
    from_division: bool,
    cells: Vec<CellRef>,
    affinities: Vec<f64>,
}

impl Track {
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Track that ended in the division this track starts from, if it has one.
    pub fn parent(&self) -> Option<TrackId> {
        self.parent
    }

    /// Whether the first member is a dividing parent shared with a sibling track.
    pub fn from_division(&self) -> bool {
        self.from_division
    }

    /// Cells of the track, one per frame, in time order.
    pub fn cells(&self) -> &[CellRef] {
        &self.cells
    }

    /// Affinity of each edge; entry `i` links `cells[i]` to `cells[i + 1]`.
    pub fn affinities(&self) -> &[f64] {
        &self.affinities
    }

    /// First cell of the track.
    pub fn root(&self) -> CellRef {
        self.cells[0]
    }

    /// Last cell of the track.
    pub fn leaf(&self) -> CellRef {
        self.cells[self.cells.len() - 1]
    }

    pub fn root_frame(&self) -> usize {
        self.root().frame_index
    }

    pub fn leaf_frame(&self) -> usize {
        self.leaf().frame_index
    }

    /// Number of member cells (always at least two).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether `cell` belongs to this track.
    pub fn contains(&self, cell: CellRef) -> bool {
        self.cells
            .binary_search_by_key(&cell.frame_index, |c| c.frame_index)
            .is_ok_and(|i| self.cells[i] == cell)
    }
}

struct Pending {
    cells: Vec<CellRef>,
    affinities: Vec<f64>,
    parent: Option<TrackId>,
    from_division: bool,
}

/// Cells that are the predecessor of more than one cell.
pub fn branch_points(edges: &[UnstructuredEdge]) -> Vec<CellRef> {
    let mut counts: BTreeMap<CellRef, usize> = BTreeMap::new();
    for e in edges {
        *counts.entry(e.prev).or_default() += 1;
    }
    counts
        .into_iter()
        .filter_map(|(cell, n)| (n > 1).then_some(cell))
        .collect()
}

/// Chain edges into structured tracks.
///
/// A maximal unbranched chain becomes one track. A cell with several
/// successors ends its track and starts one daughter track per successor.
/// Tracks without any edge are not emitted. Ids follow a breadth-first walk
/// from the roots in (frame, cell) order.
pub fn compile_tracks(edges: &[UnstructuredEdge]) -> Vec<Track> {
    let mut children: BTreeMap<CellRef, Vec<(CellRef, f64)>> = BTreeMap::new();
    let mut has_predecessor = HashSet::new();
    for e in edges {
        children.entry(e.prev).or_default().push((e.next, e.affinity));
        has_predecessor.insert(e.next);
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|(c, _)| *c);
    }

    let mut pending: VecDeque<Pending> = children
        .keys()
        .filter(|c| !has_predecessor.contains(c))
        .map(|&root| Pending {
            cells: vec![root],
            affinities: vec![],
            parent: None,
            from_division: false,
        })
        .collect();

    let mut tracks = Vec::new();
    while let Some(mut p) = pending.pop_front() {
        while let Some(&cur) = p.cells.last() {
            match children.get(&cur).map(Vec::as_slice).unwrap_or_default() {
                [] => break,
                [(next, affinity)] => {
                    p.cells.push(*next);
                    p.affinities.push(*affinity);
                }
                kids => {
                    // an edgeless parent is not emitted, so daughters inherit its parent
                    let parent = if p.affinities.is_empty() {
                        p.parent
                    } else {
                        Some(TrackId(tracks.len()))
                    };
                    for &(kid, affinity) in kids {
                        pending.push_back(Pending {
                            cells: vec![cur, kid],
                            affinities: vec![affinity],
                            parent,
                            from_division: true,
                        });
                    }
                    break;
                }
            }
        }
        if !p.affinities.is_empty() {
            tracks.push(Track {
                id: TrackId(tracks.len()),
                parent: p.parent,
                from_division: p.from_division,
                cells: p.cells,
                affinities: p.affinities,
            });
        }
    }
    tracks
}
