//! Post-hoc evaluation of a result table: extraction quality, confidence
//! distribution, accuracy against ground truth and ordinal distance.

pub mod classification;
pub mod ordinal;
pub mod quality;
pub mod report;

pub use classification::*;
pub use ordinal::*;
pub use quality::*;
pub use report::*;
