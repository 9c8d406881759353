//! From segmentation channels to cells.

mod correction;
mod extract;
pub mod morphology;

pub use correction::{CorrectionConfig, CorrectionReport, TemporalCorrector};
pub use extract::{Channel, ConsistencyWarning, Segmentation, associate_components};
