mod assembler;
mod global_matching;
pub mod matching;
mod protocol;
mod track;

pub use assembler::{CellMasks, Lineage, TrackAssembler, TrackEntry, TrackRecord, assemble};
pub use global_matching::{GlobalMatchingTracker, TrackerConfig};
pub use matching::{AssignmentResult, linear_assignment, pseudo_jaccard};
pub use protocol::{Association, Tracker, TrackerKind};
pub use track::{CellRef, Track, TrackId, UnstructuredEdge, branch_points, compile_tracks};
