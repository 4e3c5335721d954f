use std::collections::BTreeMap;

use fxhash::FxHashMap;

use crate::base::find_str::{find_str, StrParams};
use crate::caller::msa_builder::MsaBuilder;
use crate::caller::raw_variant::{RawVariant, VariantType};

const ALIGN_GAP: u8 = b'-';
const REF_HAP_IDX: usize = 0;

type StartEndIndices = (usize, usize);
type VariantKey = (usize, usize, String, String);

/// Sorted, deduplicated set of raw variants scanned out of the MSA.
pub struct VariantSet {
    variants: BTreeMap<VariantKey, RawVariant>,
}

fn build_allele(aln: &str, range: StartEndIndices) -> String {
    let (start, end) = range;
    aln[start..=end].bytes().filter(|base| *base != ALIGN_GAP).map(|b| b as char).collect()
}

fn make_var_type(ref_allele: &str, alt_allele: &str) -> VariantType {
    let ref_len = ref_allele.len() as i64;
    let alt_len = alt_allele.len() as i64;
    let diff = alt_len - ref_len;

    if diff == 0 && ref_len > 1 && alt_len > 1 {
        return VariantType::Mnp;
    }
    if diff == 0 && ref_len == 1 && alt_len == 1 {
        return VariantType::Snv;
    }
    if diff < 0 && ref_len > 1 {
        return VariantType::Del;
    }
    if diff > 0 && alt_len > 1 {
        return VariantType::Ins;
    }
    VariantType::Ref
}

fn allele_length(ref_allele: &str, alt_allele: &str, vtype: VariantType) -> i64 {
    let diff = alt_allele.len() as i64 - ref_allele.len() as i64;
    match vtype {
        VariantType::Snv => 1,
        _ if diff == 0 => alt_allele.len() as i64,
        _ => diff,
    }
}

/// MSA of multiple paths with the reference can nest indels so that both
/// alleles share a run of equal bases after the anchor. Erase the equal
/// leading bases keeping one anchor base to left align REF and ALT.
fn remove_superfluous_bases(ref_allele: &mut String, alt_allele: &mut String) -> usize {
    if ref_allele.len() == 1 || alt_allele.len() == 1 {
        return 0;
    }

    let rbytes = ref_allele.as_bytes();
    let abytes = alt_allele.as_bytes();
    let mut idx = 1usize;
    while idx < rbytes.len() && idx < abytes.len() && rbytes[idx] == abytes[idx] {
        idx += 1;
    }

    let num_superfluous_bases = idx - 1;
    ref_allele.drain(..num_superfluous_bases);
    alt_allele.drain(..num_superfluous_bases);
    num_superfluous_bases
}

impl VariantSet {
    /// Scan every REF vs ALT pairwise alignment of the MSA for variants.
    /// `base_pos1` is the 1-based genome position of the first anchor base.
    pub fn new(bldr: &MsaBuilder, chrom_index: usize, chrom_name: &str, base_pos1: usize) -> Self {
        let msa = bldr.multiple_sequence_alignment();
        let mut variants: BTreeMap<VariantKey, RawVariant> = BTreeMap::new();

        debug_assert!(msa.iter().all(|row| row.len() == msa[0].len()));

        for alt_hap_idx in 1..msa.len() {
            let ref_aln = &msa[REF_HAP_IDX];
            let alt_aln = &msa[alt_hap_idx];
            let alt_sequence = bldr.fetch_haplotype_seq(alt_hap_idx);

            for mismatch in find_variation_ranges(ref_aln, alt_aln) {
                let mut ref_allele = build_allele(ref_aln, mismatch);
                let mut alt_allele = build_allele(alt_aln, mismatch);
                let num_superfluous = remove_superfluous_bases(&mut ref_allele, &mut alt_allele);

                let (range_start, _) = mismatch;
                let nref_gaps = ref_aln[..range_start].bytes().filter(|b| *b == ALIGN_GAP).count();
                let nalt_gaps = alt_aln[..range_start].bytes().filter(|b| *b == ALIGN_GAP).count();
                let start_ref0 = range_start - nref_gaps + num_superfluous;
                let start_alt0 = range_start - nalt_gaps + num_superfluous;

                let var_type = make_var_type(&ref_allele, &alt_allele);
                if var_type == VariantType::Ref {
                    continue;
                }

                let key: VariantKey = (
                    chrom_index,
                    base_pos1 + start_ref0,
                    ref_allele.clone(),
                    alt_allele.clone(),
                );

                match variants.get_mut(&key) {
                    Some(existing) => {
                        existing.hap_start0_idxs.insert(alt_hap_idx, start_alt0);
                        if !existing.str_result.found_str {
                            existing.str_result = find_str(alt_sequence, start_alt0, &StrParams::default());
                        }
                    }
                    None => {
                        let mut hap_start0_idxs = FxHashMap::default();
                        hap_start0_idxs.insert(REF_HAP_IDX, start_ref0);
                        hap_start0_idxs.insert(alt_hap_idx, start_alt0);

                        let variant = RawVariant {
                            chrom_index,
                            chrom_name: chrom_name.to_string(),
                            genome_start1: base_pos1 + start_ref0,
                            allele_length: allele_length(&ref_allele, &alt_allele, var_type),
                            kind: var_type,
                            ref_allele,
                            alt_allele,
                            str_result: find_str(alt_sequence, start_alt0, &StrParams::default()),
                            hap_start0_idxs,
                        };
                        variants.insert(key, variant);
                    }
                }
            }
        }

        Self { variants }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn count(&self) -> usize {
        self.variants.len()
    }

    /// Variants in `(chrom, start1, ref, alt)` order.
    pub fn iter(&self) -> impl Iterator<Item = &RawVariant> {
        self.variants.values()
    }

    /// Variants on haplotype `hap_idx` whose span is fully inside the
    /// `[aln_start, aln_end]` projection of a read on that haplotype.
    pub fn find_overlapping_variants(&self, hap_idx: usize, aln_start: i64, aln_end: i64) -> Vec<&RawVariant> {
        if aln_start < 0 || aln_end < 0 {
            return Vec::new();
        }

        self.variants
            .values()
            .filter(|mvar| {
                let vstart = match mvar.hap_start0_idxs.get(&hap_idx) {
                    Some(start) => *start as i64,
                    None => return false,
                };
                let vend = vstart + mvar.allele_length;
                aln_start <= vstart && aln_end >= vend
            })
            .collect()
    }
}

/// Skip left and right flanking gap columns of the pairwise alignment.
/// Returns an inclusive column range.
fn end_gaps_free_range(ref_aln: &str, alt_aln: &str) -> StartEndIndices {
    let rbytes = ref_aln.as_bytes();
    let abytes = alt_aln.as_bytes();

    let mut start_idx = 0usize;
    while start_idx < rbytes.len() && (rbytes[start_idx] == ALIGN_GAP || abytes[start_idx] == ALIGN_GAP) {
        start_idx += 1;
    }

    let mut end_idx = rbytes.len().saturating_sub(1);
    while end_idx > 0 && (rbytes[end_idx] == ALIGN_GAP || abytes[end_idx] == ALIGN_GAP) {
        end_idx -= 1;
    }

    (start_idx, end_idx)
}

/// Mismatch runs between the two alignment rows, left aligned and expanded
/// to the anchoring matching column for indels and MNPs.
fn find_variation_ranges(ref_aln: &str, alt_aln: &str) -> Vec<StartEndIndices> {
    debug_assert_eq!(ref_aln.len(), alt_aln.len());
    let rbytes = ref_aln.as_bytes();
    let abytes = alt_aln.as_bytes();

    let (gap_free_start, gap_free_end) = end_gaps_free_range(ref_aln, alt_aln);
    if gap_free_start >= gap_free_end || gap_free_end >= ref_aln.len() {
        return Vec::new();
    }

    let mut mismatch_ranges: Vec<StartEndIndices> = Vec::with_capacity(32);
    let end = gap_free_end + 1;
    let mut idx = gap_free_start;

    while idx < end {
        // advance to the next mismatching column pair
        while idx < end && rbytes[idx] == abytes[idx] {
            idx += 1;
        }
        if idx >= end {
            break;
        }

        let mis_start = idx;
        let mut mis_end = idx;
        while mis_end < end && rbytes[mis_end] != abytes[mis_end] {
            mis_end += 1;
        }

        let mut range_start = mis_start;
        let range_end = mis_end - 1;

        // pull in the anchoring base before a gap run
        while range_start > 1 && (rbytes[range_start] == ALIGN_GAP || abytes[range_start] == ALIGN_GAP) {
            range_start -= 1;
        }

        // left align InDel/MNP ranges to the first matching column
        let is_indel_or_mnp = range_end != range_start;
        while range_start > 1 && is_indel_or_mnp && rbytes[range_start] != abytes[range_start] {
            range_start -= 1;
        }

        debug_assert!(range_start < end);
        debug_assert!(range_end < end);
        mismatch_ranges.push((range_start, range_end));

        idx = mis_end;
    }

    mismatch_ranges
}
