use fxhash::FxHashMap;

use crate::base::find_str::StrResult;

/// Variant category from the pairwise MSA scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantType {
    Ref,
    Snv,
    Ins,
    Del,
    Mnp,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Ref => "REF",
            VariantType::Snv => "SNV",
            VariantType::Ins => "INS",
            VariantType::Del => "DEL",
            VariantType::Mnp => "MNP",
        }
    }
}

/// Somatic state of a called variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantState {
    None,
    Shared,
    Normal,
    Somatic,
}

/**
 * Raw variant extracted from one or more REF vs ALT pairwise alignments of
 * the MSA. Immutable once inserted into the variant set, except for the
 * haplotype start index map which unifies across haplotypes producing the
 * same variant.
 */
#[derive(Debug, Clone)]
pub struct RawVariant {
    pub chrom_index: usize,
    pub chrom_name: String,
    pub genome_start1: usize,
    pub allele_length: i64,
    pub kind: VariantType,
    pub ref_allele: String,
    pub alt_allele: String,
    pub str_result: StrResult,

    // haplotype index -> 0-based start of the variant in that haplotype
    pub hap_start0_idxs: FxHashMap<usize, usize>,
}

impl RawVariant {
    /// Stable identifier of the variant site and alleles.
    pub fn identifier(&self) -> u64 {
        let key = format!(
            "{}\t{}\t{}\t{}",
            self.chrom_index, self.genome_start1, self.ref_allele, self.alt_allele
        );
        fxhash::hash64(&key)
    }

    /// Sort key used for the output ordering of raw variants.
    pub fn sort_key(&self) -> (usize, usize, String, String) {
        (
            self.chrom_index,
            self.genome_start1,
            self.ref_allele.clone(),
            self.alt_allele.clone(),
        )
    }
}
