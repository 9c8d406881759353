//! The step-wise tracker protocol shared by every tracker variant.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::model::Cell;
use crate::tracker::global_matching::{GlobalMatchingTracker, TrackerConfig};

/// Accepted predecessor of a cell in the next frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Association {
    /// Index of the predecessor in the previous frame's cell list
    pub prev_index: usize,
    /// Similarity score of the association
    pub affinity: f64,
}

/// A stateful frame-to-frame tracker.
///
/// Each step runs, in this order:
/// 1. [`discover_next_cells`](Tracker::discover_next_cells) once,
/// 2. [`predecessor_of_cell`](Tracker::predecessor_of_cell) for each next cell index,
/// 3. [`advance`](Tracker::advance) once.
///
/// Calls out of order fail with [`TrackingError::Protocol`](crate::TrackingError::Protocol).
pub trait Tracker {
    /// Store the cells of the next frame as temporary state.
    fn discover_next_cells(&mut self, next_cells: &[Cell], frame_shape: (usize, usize))
    -> Result<()>;

    /// Predecessor of `next_cell` among the cells committed by the previous
    /// step. Always `None` during the first step.
    fn predecessor_of_cell(
        &self,
        next_cell: &Cell,
        next_cell_index: usize,
    ) -> Result<Option<Association>>;

    /// Commit the temporary state, discarding the previous permanent state.
    fn advance(&mut self) -> Result<()>;
}

impl<T: Tracker + ?Sized> Tracker for Box<T> {
    fn discover_next_cells(
        &mut self,
        next_cells: &[Cell],
        frame_shape: (usize, usize),
    ) -> Result<()> {
        (**self).discover_next_cells(next_cells, frame_shape)
    }

    fn predecessor_of_cell(
        &self,
        next_cell: &Cell,
        next_cell_index: usize,
    ) -> Result<Option<Association>> {
        (**self).predecessor_of_cell(next_cell, next_cell_index)
    }

    fn advance(&mut self) -> Result<()> {
        (**self).advance()
    }
}

/// The closed set of tracker variants, selectable from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerKind {
    GlobalMatching(TrackerConfig),
}

impl Default for TrackerKind {
    fn default() -> Self {
        Self::GlobalMatching(TrackerConfig::default())
    }
}

impl TrackerKind {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::GlobalMatching(config) => config.validate(),
        }
    }

    /// Instantiate a fresh tracker of this kind.
    pub fn build(&self) -> Result<Box<dyn Tracker>> {
        match self {
            Self::GlobalMatching(config) => {
                Ok(Box::new(GlobalMatchingTracker::new(config.clone())?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_kind_from_json() {
        let kind: TrackerKind = serde_json::from_str(
            r#"{"kind": "global_matching", "min_jaccard": 0.4, "division_min_jaccard": 0.2}"#,
        )
        .unwrap();
        let TrackerKind::GlobalMatching(config) = &kind;
        assert_eq!(config.min_jaccard, 0.4);
        assert_eq!(config.division_min_jaccard, Some(0.2));
        assert!(kind.build().is_ok());
    }

    #[test]
    fn test_tracker_kind_rejects_bad_thresholds() {
        let kind = TrackerKind::GlobalMatching(TrackerConfig {
            min_jaccard: 1.5,
            division_min_jaccard: None,
        });
        assert!(kind.validate().is_err());
        assert!(kind.build().is_err());
    }
}
