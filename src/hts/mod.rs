pub mod alignment;
pub mod reference;

pub use alignment::{Alignment, AlignmentStream, BamExtractor, BitFlag, CigarOp, CigarUnit};
pub use reference::{parse_region_spec, ChromInfo, FastaReference, ReferenceFasta};
