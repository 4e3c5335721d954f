use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use fxhash::FxHashMap;
use log::warn;
use rust_htslib::bam::{self, Read as BamRead};

use crate::base::downsampler::Downsampler;
use crate::cbdg::{Label, Read};
use crate::core::sample_info::SampleInfo;
use crate::core::window::Region;
use crate::hts::alignment::{Alignment, AlignmentStream, BamExtractor, CigarOp, MateInfo};

const DEFAULT_MAX_WINDOW_COVERAGE: f64 = 1000.0;
const DEFAULT_MIN_READ_MAPPING_QUALITY: u8 = 20;
const DEFAULT_MIN_READ_AS_XS_DIFF: i64 = 5;
const MIN_BASE_QUALITY_FOR_ACTIVITY: u8 = 20;
const MIN_READS_FOR_MUTATION_EVIDENCE: u32 = 2;

#[derive(Debug, Clone)]
pub struct ReadCollectorParams {
    pub normal_paths: Vec<PathBuf>,
    pub tumor_paths: Vec<PathBuf>,
    pub ref_path: PathBuf,
    pub max_window_cov: f64,
    pub extract_read_pairs: bool,
    pub no_filter_reads: bool,
    pub no_contig_check: bool,
}

impl Default for ReadCollectorParams {
    fn default() -> Self {
        Self {
            normal_paths: Vec::new(),
            tumor_paths: Vec::new(),
            ref_path: PathBuf::new(),
            max_window_cov: DEFAULT_MAX_WINDOW_COVERAGE,
            extract_read_pairs: false,
            no_filter_reads: false,
            no_contig_check: false,
        }
    }
}

/**
 * Collects reads from every sample for one window: estimates coverage,
 * downsamples with a fixed seed, applies the tumor mapping filters,
 * optionally fetches mates of discordant pairs and returns the reads in
 * a deterministic order.
 */
pub struct ReadCollector {
    params: ReadCollectorParams,
    sample_list: Vec<SampleInfo>,
    extractors: FxHashMap<String, BamExtractor>,
    downsampler: Downsampler,
}

impl ReadCollector {
    pub fn new(params: ReadCollectorParams) -> Result<Self> {
        let mut sample_list: Vec<SampleInfo> = Vec::with_capacity(params.normal_paths.len() + params.tumor_paths.len());
        let mut extractors: FxHashMap<String, BamExtractor> = FxHashMap::default();

        let tagged_paths = params
            .normal_paths
            .iter()
            .map(|path| (path, Label::Normal))
            .chain(params.tumor_paths.iter().map(|path| (path, Label::Tumor)));

        for (path, tag) in tagged_paths {
            let extractor = BamExtractor::open(path, &params.ref_path)?;
            let mut sinfo = SampleInfo::new(extractor.sample_name().to_string(), path.clone(), tag);

            if params.extract_read_pairs {
                let (min_insert, max_insert) = estimate_insert_range(path)?;
                sinfo.min_expected_insert = min_insert;
                sinfo.max_expected_insert = max_insert;
            }

            extractors.insert(sinfo.sample_name().to_string(), extractor);
            sample_list.push(sinfo);
        }

        sample_list.sort_by(|lhs, rhs| lhs.sort_key().cmp(&rhs.sort_key()));

        Ok(Self {
            params,
            sample_list,
            extractors,
            downsampler: Downsampler::default(),
        })
    }

    pub fn sample_list(&self) -> &[SampleInfo] {
        &self.sample_list
    }

    pub fn sample_names(&self) -> Vec<String> {
        self.sample_list.iter().map(|s| s.sample_name().to_string()).collect()
    }

    pub fn extractors(&self) -> impl Iterator<Item = &BamExtractor> {
        self.extractors.values()
    }

    pub fn collect_region(&mut self, region: &Region) -> Result<(Vec<Read>, Vec<SampleInfo>)> {
        let max_sample_cov = self.params.max_window_cov / self.sample_list.len().max(1) as f64;
        let mut sample_reads: Vec<Read> = Vec::new();

        for sample_idx in 0..self.sample_list.len() {
            let sinfo = self.sample_list[sample_idx].clone();
            let sample_name = sinfo.sample_name().to_string();
            let is_tumor_sample = sinfo.is_tumor();
            let apply_filters = is_tumor_sample && !self.params.no_filter_reads;

            let sample_cov = self.estimate_coverage(&sinfo, region)?;
            let pct_to_sample = if sample_cov > max_sample_cov {
                (max_sample_cov * 100.0) / sample_cov
            } else {
                100.0
            };
            self.downsampler.set_percent_to_sample(pct_to_sample);

            let mut num_reads = 0u64;
            let mut num_bases = 0u64;
            let mut num_seen = 0u64;
            let mut expected_mate_regions: FxHashMap<String, MateInfo> = FxHashMap::default();

            {
                let extractor = self.extractors.get_mut(&sample_name).expect("extractor per sample");
                extractor.set_region(&region.chrom_name, region.start_pos1, region.end_pos1)?;

                while let Some(aln) = extractor.read_next()? {
                    let bflag = aln.flag;
                    if bflag.is_duplicate() || bflag.is_qc_fail() || bflag.is_secondary() {
                        continue;
                    }

                    num_seen += 1;
                    if apply_filters && fails_filter(&aln) {
                        continue;
                    }
                    if !self.downsampler.should_sample() {
                        continue;
                    }

                    num_reads += 1;
                    num_bases += aln.length() as u64;
                    sample_reads.push(make_read(&aln, &sample_name, sinfo.tag_kind()));

                    if !self.params.extract_read_pairs {
                        continue;
                    }

                    // Both mates already seen inside the window
                    if expected_mate_regions.remove(&aln.qname).is_some() {
                        continue;
                    }

                    if bflag.is_mate_unmapped() {
                        continue;
                    }

                    let curr_insert = aln.insert_size.abs();
                    let abnormal_insert =
                        curr_insert < sinfo.min_expected_insert || curr_insert > sinfo.max_expected_insert;
                    if !abnormal_insert && !aln.has_sa_tag && bflag.is_mapped_proper_pair() {
                        continue;
                    }

                    expected_mate_regions.insert(aln.qname.clone(), aln.mate_info());
                }
            }

            if self.params.extract_read_pairs && !expected_mate_regions.is_empty() {
                let found =
                    self.fetch_mates(&sample_name, sinfo.tag_kind(), &mut expected_mate_regions, &mut sample_reads)?;
                num_reads += found.0;
                num_bases += found.1;
            }

            let sinfo = &mut self.sample_list[sample_idx];
            sinfo.set_num_reads(num_reads);
            sinfo.set_num_bases(num_bases);
            sinfo.set_raw_mean_cov(sample_cov);
            sinfo.set_pass_read_fraction(if num_seen == 0 { 1.0 } else { num_reads as f64 / num_seen as f64 });
            sinfo.calculate_mean_cov(region.length());
        }

        sample_reads.sort_by(|lhs, rhs| lhs.sort_key().cmp(&rhs.sort_key()));
        Ok((sample_reads, self.sample_list.clone()))
    }

    /// Single pass over the deduped, sorted mate coordinates to collect
    /// partners of retained discordant reads.
    fn fetch_mates(
        &mut self,
        sample_name: &str,
        tag: Label,
        expected_mate_regions: &mut FxHashMap<String, MateInfo>,
        sample_reads: &mut Vec<Read>,
    ) -> Result<(u64, u64)> {
        let mut num_reads = 0u64;
        let mut num_bases = 0u64;

        let mut sorted_mates: Vec<(String, MateInfo)> = expected_mate_regions
            .iter()
            .map(|(qname, info)| (qname.clone(), *info))
            .collect();
        sorted_mates.sort_by_key(|(_, info)| (info.chrom_index, info.mate_start_pos0));

        let extractor = self.extractors.get_mut(sample_name).expect("extractor per sample");

        for (_, mate_info) in sorted_mates {
            if mate_info.chrom_index < 0 {
                continue;
            }

            let mate_chrom = match extractor.chrom_name(mate_info.chrom_index) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let mate_pos1 = (mate_info.mate_start_pos0 + 1) as u64;
            extractor.set_region(&mate_chrom, mate_pos1, mate_pos1)?;

            while let Some(aln) = extractor.read_next()? {
                if !expected_mate_regions.contains_key(&aln.qname) {
                    continue;
                }

                num_reads += 1;
                num_bases += aln.length() as u64;
                sample_reads.push(make_read(&aln, sample_name, tag));

                expected_mate_regions.remove(&aln.qname);
                break;
            }
        }

        Ok((num_reads, num_bases))
    }

    fn estimate_coverage(&mut self, sinfo: &SampleInfo, region: &Region) -> Result<f64> {
        let need_pairs = self.params.extract_read_pairs;
        let need_filters = sinfo.is_tumor() && !self.params.no_filter_reads;
        let region_start0 = region.start_pos1 as i64 - 1;
        let region_end0 = region.end_pos1 as i64;

        let extractor = self
            .extractors
            .get_mut(sinfo.sample_name())
            .expect("extractor per sample");
        extractor.set_region(&region.chrom_name, region.start_pos1, region.end_pos1)?;

        let mut num_bases = 0u64;
        while let Some(aln) = extractor.read_next()? {
            let bflag = aln.flag;
            if bflag.is_duplicate() || bflag.is_qc_fail() || bflag.is_secondary() {
                continue;
            }
            if need_filters && fails_filter(&aln) {
                continue;
            }

            if !need_pairs || aln.mate_overlaps_region(region.chrom_index, region_start0, region_end0) {
                num_bases += aln.length() as u64;
            } else {
                // the mate will be fetched later, account for it now
                num_bases += 2 * aln.length() as u64;
            }
        }

        Ok(num_bases as f64 / region.length() as f64)
    }

    /// Sweep the window in every sample counting mismatches, insertions,
    /// deletions and softclips per reference position. Two reads agreeing
    /// on any position is evidence of mutation.
    pub fn is_active_region(&mut self, region: &Region) -> Result<bool> {
        for sample_idx in 0..self.sample_list.len() {
            let sample_name = self.sample_list[sample_idx].sample_name().to_string();
            let extractor = self.extractors.get_mut(&sample_name).expect("extractor per sample");
            extractor.set_region(&region.chrom_name, region.start_pos1, region.end_pos1)?;

            if stream_has_mutation_evidence(extractor)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

fn make_read(aln: &Alignment, sample_name: &str, tag: Label) -> Read {
    Read {
        qname: aln.qname.clone(),
        sample_name: sample_name.to_string(),
        tag,
        chrom_index: aln.chrom_index.max(0) as usize,
        start0: aln.start_pos0,
        sequence: aln.sequence.clone(),
        quals: aln.quals.clone(),
        map_qual: aln.map_qual,
        is_reverse_strand: aln.flag.is_reverse_strand(),
        aln_diff_score: match (aln.aln_score, aln.sub_optimal_score) {
            (Some(aln_score), Some(sub_score)) => Some((aln_score - sub_score).abs()),
            _ => None,
        },
    }
}

/// Tumor read filters: low mapq, ambiguous BWA placements and too-close
/// suboptimal alignment scores.
pub fn fails_filter(aln: &Alignment) -> bool {
    if aln.map_qual < DEFAULT_MIN_READ_MAPPING_QUALITY {
        return true;
    }

    // AS: alignment score, XS: suboptimal alignment score
    if let (Some(aln_score), Some(sub_score)) = (aln.aln_score, aln.sub_optimal_score) {
        if (aln_score - sub_score).abs() < DEFAULT_MIN_READ_AS_XS_DIFF {
            return true;
        }
    }

    // XT type: Unique/Repeat/N/Mate-sw. XA: BWA alternative hits
    aln.has_xt_tag || aln.has_xa_tag
}

/// Mismatch genome positions from the MD tag, gated on base quality.
/// Deleted reference bases advance the genome position without touching
/// the read.
pub fn parse_md(md_val: &str, quals: &[u8], start: i64, result: &mut BTreeMap<u32, u32>) {
    if start < 0 {
        return;
    }

    let mut genome_pos = start as u32;
    let mut read_pos = 0usize;
    let mut token = String::new();
    let mut in_deletion = false;

    for character in md_val.chars() {
        if character.is_ascii_digit() {
            token.push(character);
            in_deletion = false;
            continue;
        }

        let step = token.parse::<u32>().unwrap_or(0);
        genome_pos += step;
        read_pos += step as usize;
        token.clear();

        if character == '^' {
            in_deletion = true;
            continue;
        }

        if in_deletion {
            // deleted reference base, consumes genome only
            genome_pos += 1;
            continue;
        }

        let base = character.to_ascii_uppercase();
        let high_qual = quals.get(read_pos).is_some_and(|qual| *qual >= MIN_BASE_QUALITY_FOR_ACTIVITY);
        if high_qual && matches!(base, 'A' | 'C' | 'G' | 'T') {
            *result.entry(genome_pos).or_insert(0) += 1;
        }

        genome_pos += 1;
        read_pos += 1;
    }
}

fn stream_has_mutation_evidence(stream: &mut dyn AlignmentStream) -> Result<bool> {
    let mut mismatches: BTreeMap<u32, u32> = BTreeMap::new();
    let mut insertions: BTreeMap<u32, u32> = BTreeMap::new();
    let mut deletions: BTreeMap<u32, u32> = BTreeMap::new();
    let mut softclips: BTreeMap<u32, u32> = BTreeMap::new();

    let found_mutation_evidence = |map: &BTreeMap<u32, u32>| -> bool {
        map.values().any(|count| *count >= MIN_READS_FOR_MUTATION_EVIDENCE)
    };

    while let Some(aln) = stream.read_next()? {
        let bflag = aln.flag;
        if bflag.is_duplicate() || bflag.is_qc_fail() || bflag.is_secondary() || bflag.is_unmapped() {
            continue;
        }

        if let Some(md_val) = &aln.md_tag {
            parse_md(md_val, &aln.quals, aln.start_pos0, &mut mismatches);
        }

        let mut curr_genome_pos = aln.start_pos0.max(0) as u32;
        for cig_unit in &aln.cigar {
            if cig_unit.op.consumes_reference() {
                curr_genome_pos += cig_unit.length;
            }
            match cig_unit.op {
                CigarOp::Insertion => {
                    *insertions.entry(curr_genome_pos).or_insert(0) += 1;
                }
                CigarOp::Deletion => {
                    *deletions.entry(curr_genome_pos).or_insert(0) += 1;
                }
                CigarOp::SequenceMismatch => {
                    *mismatches.entry(curr_genome_pos).or_insert(0) += 1;
                }
                CigarOp::SoftClip => {
                    *softclips.entry(curr_genome_pos).or_insert(0) += 1;
                }
                _ => {}
            }
        }

        if found_mutation_evidence(&mismatches)
            || found_mutation_evidence(&insertions)
            || found_mutation_evidence(&deletions)
            || found_mutation_evidence(&softclips)
        {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Sample names in VCF column order without building full collectors.
pub fn build_sample_name_list(params: &ReadCollectorParams) -> Result<Vec<String>> {
    let mut tagged: Vec<(String, Label)> = Vec::new();
    for path in &params.normal_paths {
        let extractor = BamExtractor::open(path, &params.ref_path)?;
        tagged.push((extractor.sample_name().to_string(), Label::Normal));
    }
    for path in &params.tumor_paths {
        let extractor = BamExtractor::open(path, &params.ref_path)?;
        tagged.push((extractor.sample_name().to_string(), Label::Tumor));
    }

    tagged.sort();
    tagged.sort_by_key(|(_, tag)| *tag);
    Ok(tagged.into_iter().map(|(name, _)| name).collect())
}

/// Mean insert size plus/minus two standard deviations over the first
/// well-mapped proper pairs of the file.
fn estimate_insert_range(aln_path: &std::path::Path) -> Result<(i64, i64)> {
    const MAX_READS_TO_SAMPLE: u64 = 100_000;
    const MIN_REQUIRED_MAPPING_QUALITY: u8 = 30;
    const SIGMA: f64 = 2.0;

    let mut reader = bam::Reader::from_path(aln_path)
        .with_context(|| format!("could not open {} to estimate insert sizes", aln_path.display()))?;

    let mut count = 0u64;
    let mut mean = 0.0f64;
    let mut sq_dist = 0.0f64;

    let mut record = bam::Record::new();
    while let Some(result) = reader.read(&mut record) {
        result.context("failed to read alignment record")?;
        if count >= MAX_READS_TO_SAMPLE {
            break;
        }

        if record.is_secondary()
            || record.is_supplementary()
            || record.is_quality_check_failed()
            || record.is_duplicate()
            || record.tid() != record.mtid()
            || record.mapq() < MIN_REQUIRED_MAPPING_QUALITY
        {
            continue;
        }

        let only_matches = record.cigar().iter().all(|cig| {
            matches!(cig, bam::record::Cigar::Match(_) | bam::record::Cigar::Equal(_))
        });
        if !(record.is_paired() && record.is_proper_pair() && only_matches) {
            continue;
        }

        // Welford running mean and variance
        count += 1;
        let insert = record.insert_size().abs() as f64;
        let delta = insert - mean;
        mean += delta / count as f64;
        sq_dist += delta * (insert - mean);
    }

    if count < 2 {
        warn!("Too few proper pairs in {} to estimate insert range", aln_path.display());
        return Ok((0, i64::MAX));
    }

    let std_dev = (sq_dist / count as f64).sqrt();
    Ok(((mean - SIGMA * std_dev) as i64, (mean + SIGMA * std_dev) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hts::alignment::{BitFlag, CigarUnit, VecAlignmentStream};

    fn plain_aln(qname: &str, start0: i64, len: u32, md: Option<&str>) -> Alignment {
        Alignment {
            qname: qname.to_string(),
            chrom_index: 0,
            start_pos0: start0,
            mate_chrom_index: 0,
            mate_start_pos0: start0 + 200,
            insert_size: 300,
            flag: BitFlag(0x1 | 0x2),
            map_qual: 60,
            sequence: "A".repeat(len as usize),
            quals: vec![35; len as usize],
            cigar: vec![CigarUnit { op: CigarOp::AlignmentMatch, length: len }],
            md_tag: md.map(str::to_string),
            aln_score: Some(100),
            sub_optimal_score: Some(20),
            has_xt_tag: false,
            has_xa_tag: false,
            has_sa_tag: false,
        }
    }

    #[test]
    fn md_parse_counts_high_quality_mismatches() {
        let mut mismatches = BTreeMap::new();
        // 10 matches, mismatch A, 5 matches, deletion of CT, 3 matches, mismatch G
        parse_md("10A5^CT3G0", &vec![35; 30], 100, &mut mismatches);

        assert_eq!(mismatches.get(&110), Some(&1));
        // deletion advances genome by 2: 110+1+5 = 116, +2 del = 118, +3 = 121
        assert_eq!(mismatches.get(&121), Some(&1));
        assert_eq!(mismatches.len(), 2);
    }

    #[test]
    fn md_parse_skips_low_quality_bases() {
        let mut mismatches = BTreeMap::new();
        parse_md("5A5", &vec![5; 11], 0, &mut mismatches);
        assert!(mismatches.is_empty());
    }

    #[test]
    fn matching_reads_are_inactive() {
        let alns: Vec<Alignment> = (0..20).map(|idx| plain_aln(&format!("q{idx}"), idx * 10, 100, Some("100"))).collect();
        let mut stream = VecAlignmentStream::new(alns);
        stream.set_region("chr1", 1, 2000).unwrap();
        assert!(!stream_has_mutation_evidence(&mut stream).unwrap());
    }

    #[test]
    fn two_reads_sharing_a_mismatch_are_active() {
        let mut alns = vec![plain_aln("q1", 100, 100, Some("50A49")), plain_aln("q2", 100, 100, Some("50A49"))];
        alns.push(plain_aln("q3", 300, 100, Some("100")));

        let mut stream = VecAlignmentStream::new(alns);
        stream.set_region("chr1", 1, 2000).unwrap();
        assert!(stream_has_mutation_evidence(&mut stream).unwrap());
    }

    #[test]
    fn single_mismatch_read_is_not_enough() {
        let alns = vec![plain_aln("q1", 100, 100, Some("50A49")), plain_aln("q2", 100, 100, Some("100"))];
        let mut stream = VecAlignmentStream::new(alns);
        stream.set_region("chr1", 1, 2000).unwrap();
        assert!(!stream_has_mutation_evidence(&mut stream).unwrap());
    }

    #[test]
    fn shared_insertions_make_the_region_active() {
        let mut aln1 = plain_aln("q1", 100, 100, Some("100"));
        aln1.cigar = vec![
            CigarUnit { op: CigarOp::AlignmentMatch, length: 50 },
            CigarUnit { op: CigarOp::Insertion, length: 3 },
            CigarUnit { op: CigarOp::AlignmentMatch, length: 47 },
        ];
        let mut aln2 = aln1.clone();
        aln2.qname = "q2".to_string();

        let mut stream = VecAlignmentStream::new(vec![aln1, aln2]);
        stream.set_region("chr1", 1, 2000).unwrap();
        assert!(stream_has_mutation_evidence(&mut stream).unwrap());
    }

    #[test]
    fn tumor_filters_reject_ambiguous_reads() {
        let mut low_mapq = plain_aln("q1", 0, 100, None);
        low_mapq.map_qual = 10;
        assert!(fails_filter(&low_mapq));

        let mut close_scores = plain_aln("q2", 0, 100, None);
        close_scores.aln_score = Some(100);
        close_scores.sub_optimal_score = Some(98);
        assert!(fails_filter(&close_scores));

        let mut xa_tagged = plain_aln("q3", 0, 100, None);
        xa_tagged.has_xa_tag = true;
        assert!(fails_filter(&xa_tagged));

        assert!(!fails_filter(&plain_aln("q4", 0, 100, None)));
    }
}
