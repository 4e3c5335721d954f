use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::caller::fisher::{fisher_exact_two_sided, phred_scaled};
use crate::caller::genotyper::PerSampleEvidence;
use crate::caller::raw_variant::{RawVariant, VariantState, VariantType};
use crate::caller::variant_support::VariantSupport;
use crate::core::sample_info::SampleInfo;

const FORMAT_KEYS: &str = "GT:AD:ADF:ADR:DP:WDC:WTC:PRF:VAF:RAQS:AAQS:RMQS:AMQS:RAPDS:AAPDS:GQ:PL";
const MAX_ODDS_RATIO: f64 = 255.0;

/// Filter thresholds for the somatic classifier.
#[derive(Debug, Clone)]
pub struct VariantCallParams {
    pub min_nml_cov: u32,
    pub min_tmr_cov: u32,
    pub max_nml_vaf: f64,
    pub min_odds_ratio: f64,
    pub min_fisher: f64,
    pub min_str_fisher: f64,
}

impl Default for VariantCallParams {
    fn default() -> Self {
        Self {
            min_nml_cov: 10,
            min_tmr_cov: 4,
            max_nml_vaf: 0.02,
            min_odds_ratio: 0.0,
            min_fisher: 5.0,
            min_str_fisher: 10.0,
        }
    }
}

/**
 * Fully formed variant record ready for VCF output: genotypes, qualities,
 * somatic state and the INFO/FORMAT columns. Lives in the variant store
 * until every in-flight window before it has completed.
 */
#[derive(Debug, Clone)]
pub struct VariantCall {
    variant_id: u64,
    chrom_index: usize,
    chrom_name: String,
    start_pos1: usize,
    total_sample_cov: u32,

    ref_allele: String,
    alt_allele: String,
    variant_length: i64,
    site_quality: f64,
    state: VariantState,
    category: VariantType,

    info_field: String,
    format_fields: Vec<String>,
}

impl VariantCall {
    pub fn new(
        var: &RawVariant,
        supports: &PerSampleEvidence,
        samples: &[SampleInfo],
        params: &VariantCallParams,
        kmer_len: usize,
    ) -> Self {
        let empty_support = VariantSupport::default();
        let support_of = |sample: &SampleInfo| -> &VariantSupport {
            supports.get(sample.sample_name()).unwrap_or(&empty_support)
        };

        let normals: Vec<&SampleInfo> = samples.iter().filter(|s| s.is_normal()).collect();
        let tumors: Vec<&SampleInfo> = samples.iter().filter(|s| s.is_tumor()).collect();

        let nml_has_alt = normals.iter().any(|s| support_of(s).alt_count() > 0);
        let tmr_has_alt = tumors.iter().any(|s| support_of(s).alt_count() > 0);

        // Fisher phred comparing the strongest tumor evidence against each
        // normal sample; the weakest separation is the site quality
        let best_tumor = tumors
            .iter()
            .max_by_key(|s| (support_of(s).alt_count(), support_of(s).total_cov()))
            .copied();

        let site_quality = match best_tumor {
            Some(tumor) if !normals.is_empty() => {
                let tmr = support_of(tumor);
                normals
                    .iter()
                    .map(|nml_sample| {
                        let nml = support_of(nml_sample);
                        let p_value = fisher_exact_two_sided(
                            u64::from(tmr.ref_count()),
                            u64::from(tmr.alt_count()),
                            u64::from(nml.ref_count()),
                            u64::from(nml.alt_count()),
                        );
                        OrderedFloat(phred_scaled(p_value))
                    })
                    .min()
                    .map(|phred| phred.0)
                    .unwrap_or(0.0)
            }
            _ => 0.0,
        };

        let max_tumor_vaf = tumors
            .iter()
            .map(|s| OrderedFloat(support_of(s).vaf()))
            .max()
            .map(|vaf| vaf.0)
            .unwrap_or(0.0);
        let max_normal_vaf = normals
            .iter()
            .map(|s| OrderedFloat(support_of(s).vaf()))
            .max()
            .map(|vaf| vaf.0)
            .unwrap_or(0.0);
        let odds_ratio = if max_normal_vaf == 0.0 {
            if max_tumor_vaf > 0.0 { MAX_ODDS_RATIO } else { 0.0 }
        } else {
            (max_tumor_vaf / max_normal_vaf).clamp(0.0, MAX_ODDS_RATIO)
        };

        let min_req_fisher = if var.str_result.found_str {
            params.min_str_fisher
        } else {
            params.min_fisher
        };

        let somatic_evidence = tumors
            .iter()
            .any(|s| support_of(s).alt_count() > 0 && support_of(s).total_cov() >= params.min_tmr_cov);
        let normals_support_somatic = !normals.is_empty()
            && normals.iter().all(|s| {
                let nml = support_of(s);
                nml.total_cov() >= params.min_nml_cov && nml.vaf() < params.max_nml_vaf
            });

        let state = if tmr_has_alt && nml_has_alt {
            VariantState::Shared
        } else if nml_has_alt {
            VariantState::Normal
        } else if somatic_evidence
            && normals_support_somatic
            && odds_ratio >= params.min_odds_ratio
            && site_quality >= min_req_fisher
        {
            VariantState::Somatic
        } else {
            VariantState::None
        };

        let info_field = Self::build_info_field(var, state, kmer_len);

        let mut format_fields: Vec<String> = Vec::with_capacity(samples.len() + 1);
        format_fields.push(FORMAT_KEYS.to_string());
        let mut total_sample_cov = 0u32;
        for sample in samples {
            let support = support_of(sample);
            total_sample_cov += support.total_cov();
            format_fields.push(Self::build_sample_field(sample, support));
        }

        Self {
            variant_id: var.identifier(),
            chrom_index: var.chrom_index,
            chrom_name: var.chrom_name.clone(),
            start_pos1: var.genome_start1,
            total_sample_cov,
            ref_allele: var.ref_allele.clone(),
            alt_allele: var.alt_allele.clone(),
            variant_length: var.allele_length,
            site_quality,
            state,
            category: var.kind,
            info_field,
            format_fields,
        }
    }

    fn build_info_field(var: &RawVariant, state: VariantState, kmer_len: usize) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(8);
        match state {
            VariantState::Shared => parts.push("SHARED".to_string()),
            VariantState::Normal => parts.push("NORMAL".to_string()),
            VariantState::Somatic => parts.push("TUMOR".to_string()),
            VariantState::None => {}
        }

        if var.str_result.found_str {
            parts.push("STR".to_string());
        }

        parts.push(format!("TYPE={}", var.kind.as_str()));
        parts.push(format!("LENGTH={}", var.allele_length));
        parts.push(format!("KMERLEN={kmer_len}"));

        if var.str_result.found_str {
            parts.push(format!("STR_LEN={}", var.str_result.str_len));
            parts.push(format!("STR_MOTIF={}", var.str_result.str_motif));
        }

        parts.join(";")
    }

    fn build_sample_field(sample: &SampleInfo, support: &VariantSupport) -> String {
        let (_, genotype, genotype_quality) = support.genotype();
        let pls = support.genotype_likelihoods();
        let (ref_fwd, ref_rev, alt_fwd, alt_rev) = support.strand_counts();

        let fmt_stats = |stats: [u32; 4]| -> String { stats.iter().join(",") };

        format!(
            "{gt}:{rc},{ac}:{rf},{af}:{rr},{ar}:{dp}:{wdc:.2}:{wtc:.2}:{prf:.2}:{vaf:.4}:{raqs}:{aaqs}:{rmqs}:{amqs}:{rapds}:{aapds}:{gq}:{pl0},{pl1},{pl2}",
            gt = genotype,
            rc = support.ref_count(),
            ac = support.alt_count(),
            rf = ref_fwd,
            af = alt_fwd,
            rr = ref_rev,
            ar = alt_rev,
            dp = support.total_cov(),
            wdc = sample.mean_cov(),
            wtc = sample.raw_mean_cov(),
            prf = sample.pass_read_fraction(),
            vaf = support.vaf(),
            raqs = fmt_stats(support.ref_qual_stats()),
            aaqs = fmt_stats(support.alt_qual_stats()),
            rmqs = fmt_stats(support.ref_map_qual_stats()),
            amqs = fmt_stats(support.alt_map_qual_stats()),
            rapds = fmt_stats(support.ref_pct_diff_stats()),
            aapds = fmt_stats(support.alt_pct_diff_stats()),
            gq = genotype_quality,
            pl0 = pls[0],
            pl1 = pls[1],
            pl2 = pls[2],
        )
    }

    pub fn identifier(&self) -> u64 {
        self.variant_id
    }

    pub fn chrom_index(&self) -> usize {
        self.chrom_index
    }

    pub fn chrom_name(&self) -> &str {
        &self.chrom_name
    }

    pub fn start_pos1(&self) -> usize {
        self.start_pos1
    }

    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }

    pub fn length(&self) -> i64 {
        self.variant_length
    }

    pub fn quality(&self) -> f64 {
        self.site_quality
    }

    pub fn state(&self) -> VariantState {
        self.state
    }

    pub fn category(&self) -> VariantType {
        self.category
    }

    pub fn total_coverage(&self) -> u32 {
        self.total_sample_cov
    }

    pub fn sort_key(&self) -> (usize, usize, &str, &str, i64, u8) {
        (
            self.chrom_index,
            self.start_pos1,
            self.ref_allele.as_str(),
            self.alt_allele.as_str(),
            self.variant_length,
            self.category as u8,
        )
    }

    /// One tab-separated VCFv4.3 record without the trailing newline.
    pub fn as_vcf_record(&self) -> String {
        let mut record = format!(
            "{}\t{}\t.\t{}\t{}\t{:.2}\t.\t{}",
            self.chrom_name, self.start_pos1, self.ref_allele, self.alt_allele, self.site_quality, self.info_field
        );

        for field in &self.format_fields {
            record.push('\t');
            record.push_str(field);
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use fxhash::FxHashMap;

    use super::*;
    use crate::base::find_str::StrResult;
    use crate::caller::variant_support::{AlleleSide, Strand};
    use crate::cbdg::Label;

    fn snv_variant() -> RawVariant {
        RawVariant {
            chrom_index: 0,
            chrom_name: "chr1".to_string(),
            genome_start1: 100500,
            allele_length: 1,
            kind: VariantType::Snv,
            ref_allele: "A".to_string(),
            alt_allele: "G".to_string(),
            str_result: StrResult::default(),
            hap_start0_idxs: FxHashMap::default(),
        }
    }

    fn sample(name: &str, tag: Label) -> SampleInfo {
        let mut sinfo = SampleInfo::new(name.to_string(), format!("{name}.bam").into(), tag);
        sinfo.set_num_bases(30_000);
        sinfo.calculate_mean_cov(1000);
        sinfo.set_raw_mean_cov(30.0);
        sinfo
    }

    fn support_with(nref: u32, nalt: u32) -> VariantSupport {
        let mut support = VariantSupport::default();
        for idx in 0..nref {
            let strand = if idx % 2 == 0 { Strand::Fwd } else { Strand::Rev };
            support.add_evidence(AlleleSide::Ref, strand, 35, 60, 0.3);
        }
        for idx in 0..nalt {
            let strand = if idx % 2 == 0 { Strand::Fwd } else { Strand::Rev };
            support.add_evidence(AlleleSide::Alt, strand, 35, 60, 0.3);
        }
        support
    }

    fn call_for(nml: (u32, u32), tmr: (u32, u32)) -> VariantCall {
        let samples = vec![sample("nml", Label::Normal), sample("tmr", Label::Tumor)];
        let mut supports: PerSampleEvidence = FxHashMap::default();
        supports.insert("nml".to_string(), support_with(nml.0, nml.1));
        supports.insert("tmr".to_string(), support_with(tmr.0, tmr.1));
        VariantCall::new(&snv_variant(), &supports, &samples, &VariantCallParams::default(), 17)
    }

    #[test]
    fn clean_somatic_site_is_classified_tumor() {
        let call = call_for((30, 0), (15, 15));
        assert_eq!(call.state(), VariantState::Somatic);
        assert!(call.quality() >= 30.0);
        assert!(call.as_vcf_record().contains("TUMOR;TYPE=SNV;LENGTH=1"));
    }

    #[test]
    fn germline_site_is_classified_normal() {
        let call = call_for((15, 15), (30, 0));
        assert_eq!(call.state(), VariantState::Normal);
        assert!(call.as_vcf_record().contains("NORMAL;TYPE=SNV"));
    }

    #[test]
    fn alt_in_both_samples_is_shared() {
        let call = call_for((15, 15), (15, 15));
        assert_eq!(call.state(), VariantState::Shared);
        assert!(call.as_vcf_record().contains("SHARED;TYPE=SNV"));
    }

    #[test]
    fn low_tumor_support_is_not_called() {
        let call = call_for((30, 0), (30, 0));
        assert_eq!(call.state(), VariantState::None);
    }

    #[test]
    fn vcf_record_shape_matches_the_format_schema() {
        let call = call_for((30, 0), (15, 15));
        let record = call.as_vcf_record();
        let columns: Vec<&str> = record.split('\t').collect();

        // CHROM POS ID REF ALT QUAL FILTER INFO FORMAT + 2 samples
        assert_eq!(columns.len(), 11);
        assert_eq!(columns[0], "chr1");
        assert_eq!(columns[1], "100500");
        assert_eq!(columns[3], "A");
        assert_eq!(columns[4], "G");
        assert_eq!(columns[8], FORMAT_KEYS);

        let tumor_field = columns[10];
        assert!(tumor_field.starts_with("0/1:15,15:"));
        let entries: Vec<&str> = tumor_field.split(':').collect();
        assert_eq!(entries.len(), FORMAT_KEYS.split(':').count());
    }

    #[test]
    fn str_sites_require_the_str_fisher_threshold() {
        let mut var = snv_variant();
        var.str_result = StrResult {
            found_str: true,
            str_len: 12,
            str_motif: "AT".to_string(),
        };

        let samples = vec![sample("nml", Label::Normal), sample("tmr", Label::Tumor)];
        let mut supports: PerSampleEvidence = FxHashMap::default();
        supports.insert("nml".to_string(), support_with(30, 0));
        supports.insert("tmr".to_string(), support_with(15, 15));

        let call = VariantCall::new(&var, &supports, &samples, &VariantCallParams::default(), 17);
        assert_eq!(call.state(), VariantState::Somatic);
        let record = call.as_vcf_record();
        assert!(record.contains("STR;TYPE=SNV"));
        assert!(record.contains("STR_LEN=12"));
        assert!(record.contains("STR_MOTIF=AT"));
    }
}
