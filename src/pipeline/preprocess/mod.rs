//! Text preprocessing: normalization, section detection and chunking.
//!
//! Everything here is pure and deterministic. Offsets produced by the
//! section detector and the chunker are byte offsets into the normalized
//! document they were computed from.

pub mod types;
pub mod normalize;
pub mod sections;
pub mod splitter;
pub mod chunker;
pub mod screening;

pub use types::*;
pub use normalize::*;
pub use sections::*;
pub use splitter::*;
pub use chunker::*;
pub use screening::*;
