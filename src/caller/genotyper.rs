use bio::alignment::pairwise::Aligner;
use bio::alignment::Alignment;
use bio::alignment::AlignmentOperation;
use fxhash::FxHashMap;

use crate::base::rev_comp::rev_comp;
use crate::caller::raw_variant::RawVariant;
use crate::caller::variant_set::VariantSet;
use crate::caller::variant_support::{AlleleSide, Strand, VariantSupport};
use crate::cbdg::Read;

// Short-gap piece of the asm5 scoring used for the POA, which is enough
// for read-to-haplotype realignment where the true haplotype matches
const REALN_MATCH: i32 = 1;
const REALN_MISMATCH: i32 = -19;
const REALN_GAP_OPEN: i32 = -39;
const REALN_GAP_EXTEND: i32 = -3;

const DEFAULT_READ_FLANK_LEN: usize = 5;

pub type PerSampleEvidence = FxHashMap<String, VariantSupport>;

/**
 * Read-realignment genotyper.
 *
 * Every collected read is aligned to every haplotype in both orientations;
 * the best scoring haplotype claims the read. A read supports a variant
 * when its best haplotype carries the variant and the read projection
 * covers the variant span plus flanks on both sides.
 */
pub struct Genotyper {
    min_alt_quality: u8,
    flank_len: usize,
}

impl Default for Genotyper {
    fn default() -> Self {
        Self::new(20)
    }
}

impl Genotyper {
    pub fn new(min_alt_quality: u8) -> Self {
        Self {
            min_alt_quality,
            flank_len: DEFAULT_READ_FLANK_LEN,
        }
    }

    pub fn genotype(
        &self,
        haplotypes: &[String],
        reads: &[Read],
        vset: &VariantSet,
        sample_names: &[String],
    ) -> Vec<(RawVariant, PerSampleEvidence)> {
        let mut results: Vec<(RawVariant, PerSampleEvidence)> = vset
            .iter()
            .map(|var| {
                let supports: PerSampleEvidence = sample_names
                    .iter()
                    .map(|name| (name.clone(), VariantSupport::default()))
                    .collect();
                (var.clone(), supports)
            })
            .collect();

        for read in reads {
            if read.sequence.len() < self.flank_len || haplotypes.is_empty() {
                continue;
            }

            let assignment = match self.assign_read(haplotypes, read) {
                Some(assignment) => assignment,
                None => continue,
            };

            let side = if assignment.hap_idx == 0 { AlleleSide::Ref } else { AlleleSide::Alt };
            let strand = if read.is_reverse_strand { Strand::Rev } else { Strand::Fwd };

            for (var, supports) in &mut results {
                let vstart = match var.hap_start0_idxs.get(&assignment.hap_idx) {
                    Some(start) => *start,
                    None => continue,
                };

                let span_len = if assignment.hap_idx == 0 {
                    var.ref_allele.len()
                } else {
                    var.alt_allele.len()
                };
                let vend = vstart + span_len;

                let flank = self.flank_len as i64;
                let covers_span = assignment.hap_start as i64 <= vstart as i64 - flank
                    && assignment.hap_end as i64 >= vend as i64 + flank;
                if !covers_span {
                    continue;
                }

                let base_qual = assignment.span_base_qual(read, vstart, vend);
                if side == AlleleSide::Alt && base_qual < self.min_alt_quality {
                    continue;
                }

                if let Some(support) = supports.get_mut(&read.sample_name) {
                    support.add_evidence(side, strand, base_qual, read.map_qual, assignment.pct_diff);
                }
            }
        }

        results
    }

    /// Best haplotype for the read by affine alignment score over both
    /// orientations, with the percent difference to the runner-up.
    fn assign_read(&self, haplotypes: &[String], read: &Read) -> Option<ReadAssignment> {
        let score_fn = |a: u8, b: u8| if a == b { REALN_MATCH } else { REALN_MISMATCH };
        let read_bytes = read.sequence.as_bytes();
        let rc_seq = rev_comp(&read.sequence);
        let rc_bytes = rc_seq.as_bytes();

        let mut best: Option<(usize, Alignment, bool, i32)> = None;
        let mut second_score = i32::MIN;

        for (hap_idx, haplotype) in haplotypes.iter().enumerate() {
            if haplotype.len() < read.sequence.len() {
                continue;
            }

            let hap_bytes = haplotype.as_bytes();
            let mut aligner =
                Aligner::with_capacity(read_bytes.len(), hap_bytes.len(), REALN_GAP_OPEN, REALN_GAP_EXTEND, &score_fn);

            let fwd_aln = aligner.semiglobal(read_bytes, hap_bytes);
            let rc_aln = aligner.semiglobal(rc_bytes, hap_bytes);

            let (aln, is_rc) = if rc_aln.score > fwd_aln.score {
                (rc_aln, true)
            } else {
                (fwd_aln, false)
            };

            let score = aln.score;
            match best.as_ref() {
                Some((_, _, _, best_score)) if score <= *best_score => {
                    second_score = second_score.max(score);
                }
                _ => {
                    if let Some((_, _, _, prev_best)) = best.as_ref() {
                        second_score = second_score.max(*prev_best);
                    }
                    best = Some((hap_idx, aln, is_rc, score));
                }
            }
        }

        let (hap_idx, alignment, is_rc, best_score) = best?;
        let pct_diff = if best_score > 0 && second_score > i32::MIN {
            f64::from(best_score - second_score) / f64::from(best_score)
        } else {
            0.0
        };

        Some(ReadAssignment {
            hap_idx,
            hap_start: alignment.ystart,
            hap_end: alignment.yend,
            is_rc,
            pct_diff,
            alignment,
        })
    }
}

struct ReadAssignment {
    hap_idx: usize,
    hap_start: usize,
    hap_end: usize,
    is_rc: bool,
    pct_diff: f64,
    alignment: Alignment,
}

impl ReadAssignment {
    /// Mean base quality of the read bases projected onto the haplotype
    /// interval `[vstart, vend)`.
    fn span_base_qual(&self, read: &Read, vstart: usize, vend: usize) -> u8 {
        let quals: Vec<u8> = if self.is_rc {
            read.quals.iter().rev().copied().collect()
        } else {
            read.quals.clone()
        };

        let mut read_pos = self.alignment.xstart;
        let mut hap_pos = self.alignment.ystart;
        let mut qual_sum = 0u32;
        let mut qual_count = 0u32;

        for op in &self.alignment.operations {
            match op {
                AlignmentOperation::Match | AlignmentOperation::Subst => {
                    if hap_pos >= vstart && hap_pos < vend {
                        qual_sum += u32::from(quals[read_pos]);
                        qual_count += 1;
                    }
                    read_pos += 1;
                    hap_pos += 1;
                }
                AlignmentOperation::Ins => {
                    // extra read bases between haplotype positions
                    if hap_pos > vstart && hap_pos < vend {
                        qual_sum += u32::from(quals[read_pos]);
                        qual_count += 1;
                    }
                    read_pos += 1;
                }
                AlignmentOperation::Del => {
                    hap_pos += 1;
                }
                AlignmentOperation::Xclip(len) => {
                    read_pos += len;
                }
                AlignmentOperation::Yclip(_) => {}
            }
        }

        if qual_count == 0 {
            let mid = quals.len() / 2;
            return quals.get(mid).copied().unwrap_or(0);
        }

        (qual_sum / qual_count) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::msa_builder::MsaBuilder;
    use crate::cbdg::Label;

    fn make_read(seq: &str, sample: &str, tag: Label, qname: &str, reverse: bool) -> Read {
        Read {
            qname: qname.to_string(),
            sample_name: sample.to_string(),
            tag,
            chrom_index: 0,
            start0: 0,
            sequence: seq.to_string(),
            quals: vec![35; seq.len()],
            map_qual: 60,
            is_reverse_strand: reverse,
            aln_diff_score: None,
        }
    }

    fn snv_fixture() -> (Vec<String>, VariantSet) {
        let reference = "TTGACCCTGAAGGACCTTAGCATTGCAGGATCCAGATTACCAGAGGACATTTGACCA".to_string();
        let alt = reference.replace("GCATT", "GCGTT");
        let haps = vec![reference, alt];
        let bldr = MsaBuilder::new(&haps, None, "test");
        let vset = VariantSet::new(&bldr, 0, "chr1", 1000);
        (haps, vset)
    }

    #[test]
    fn reads_split_between_ref_and_alt_alleles() {
        let (haps, vset) = snv_fixture();
        let samples = vec!["tmr".to_string()];

        let mut reads = Vec::new();
        for idx in 0..10 {
            reads.push(make_read(&haps[0], "tmr", Label::Tumor, &format!("r{idx}"), idx % 2 == 0));
            reads.push(make_read(&haps[1], "tmr", Label::Tumor, &format!("a{idx}"), idx % 2 == 1));
        }

        let genotyper = Genotyper::default();
        let results = genotyper.genotype(&haps, &reads, &vset, &samples);
        assert_eq!(results.len(), 1);

        let support = &results[0].1["tmr"];
        assert_eq!(support.ref_count(), 10);
        assert_eq!(support.alt_count(), 10);
        assert!((support.vaf() - 0.5).abs() < 1e-9);

        let (fwd_ref, rev_ref, fwd_alt, rev_alt) = support.strand_counts();
        assert_eq!(fwd_ref + rev_ref, 10);
        assert_eq!(fwd_alt + rev_alt, 10);
        assert!(fwd_ref > 0 && rev_ref > 0 && fwd_alt > 0 && rev_alt > 0);
    }

    #[test]
    fn reads_not_covering_the_variant_are_ignored() {
        let (haps, vset) = snv_fixture();
        let samples = vec!["tmr".to_string()];

        // variant sits at offset 21; this read covers only the tail
        let tail = &haps[0][haps[0].len() - 20..];
        let reads = vec![make_read(tail, "tmr", Label::Tumor, "tail", false)];

        let genotyper = Genotyper::default();
        let results = genotyper.genotype(&haps, &reads, &vset, &samples);
        let support = &results[0].1["tmr"];
        assert_eq!(support.total_cov(), 0);
    }

    #[test]
    fn low_quality_alt_bases_are_filtered() {
        let (haps, vset) = snv_fixture();
        let samples = vec!["tmr".to_string()];

        let mut read = make_read(&haps[1], "tmr", Label::Tumor, "lowq", false);
        read.quals = vec![5; read.sequence.len()];

        let genotyper = Genotyper::default();
        let results = genotyper.genotype(&haps, &[read], &vset, &samples);
        let support = &results[0].1["tmr"];
        assert_eq!(support.alt_count(), 0);
    }

    #[test]
    fn samples_without_reads_keep_empty_support() {
        let (haps, vset) = snv_fixture();
        let samples = vec!["nml".to_string(), "tmr".to_string()];

        let reads = vec![make_read(&haps[1], "tmr", Label::Tumor, "only", false)];
        let genotyper = Genotyper::default();
        let results = genotyper.genotype(&haps, &reads, &vset, &samples);

        assert_eq!(results[0].1["nml"].total_cov(), 0);
        assert_eq!(results[0].1["tmr"].alt_count(), 1);
    }
}
