mod bbox;
mod cell;
mod compartment;
mod frame;
mod mask;

pub use bbox::BoundingBox;
pub use cell::{Cell, CellState};
pub use compartment::{Compartment, FeatureValue};
pub use frame::{Frame, FrameCache};
pub use mask::PackedMask;
