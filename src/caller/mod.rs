pub mod fisher;
pub mod genotyper;
pub mod msa_builder;
pub mod raw_variant;
pub mod variant_call;
pub mod variant_set;
pub mod variant_support;

pub use genotyper::Genotyper;
pub use msa_builder::MsaBuilder;
pub use raw_variant::{RawVariant, VariantState, VariantType};
pub use variant_call::{VariantCall, VariantCallParams};
pub use variant_set::VariantSet;
pub use variant_support::VariantSupport;
