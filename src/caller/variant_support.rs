#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlleleSide {
    Ref,
    Alt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Fwd,
    Rev,
}

// ~ -10 * log10(0.5), the phred cost per read under a heterozygous model
const HET_PHRED_PER_READ: f64 = 3.0103;
const MAX_GENOTYPE_QUALITY: u32 = 99;

/**
 * Per-sample evidence for one variant: base/mapping quality and alignment
 * score distributions per allele, plus per-strand read counts. Populated
 * by the genotyper, consumed by the variant call formatter.
 */
#[derive(Debug, Clone, Default)]
pub struct VariantSupport {
    ref_quals: Vec<u8>,
    alt_quals: Vec<u8>,
    ref_map_quals: Vec<u8>,
    alt_map_quals: Vec<u8>,
    ref_pct_diffs: Vec<f64>,
    alt_pct_diffs: Vec<f64>,
    ref_fwd: u32,
    ref_rev: u32,
    alt_fwd: u32,
    alt_rev: u32,
}

impl VariantSupport {
    pub fn add_evidence(&mut self, side: AlleleSide, strand: Strand, base_qual: u8, map_qual: u8, pct_diff: f64) {
        match side {
            AlleleSide::Ref => {
                self.ref_quals.push(base_qual);
                self.ref_map_quals.push(map_qual);
                self.ref_pct_diffs.push(pct_diff);
                match strand {
                    Strand::Fwd => self.ref_fwd += 1,
                    Strand::Rev => self.ref_rev += 1,
                }
            }
            AlleleSide::Alt => {
                self.alt_quals.push(base_qual);
                self.alt_map_quals.push(map_qual);
                self.alt_pct_diffs.push(pct_diff);
                match strand {
                    Strand::Fwd => self.alt_fwd += 1,
                    Strand::Rev => self.alt_rev += 1,
                }
            }
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_fwd + self.ref_rev
    }

    pub fn alt_count(&self) -> u32 {
        self.alt_fwd + self.alt_rev
    }

    pub fn total_cov(&self) -> u32 {
        self.ref_count() + self.alt_count()
    }

    pub fn strand_counts(&self) -> (u32, u32, u32, u32) {
        (self.ref_fwd, self.ref_rev, self.alt_fwd, self.alt_rev)
    }

    pub fn vaf(&self) -> f64 {
        let total = self.total_cov();
        if total == 0 {
            return 0.0;
        }
        f64::from(self.alt_count()) / f64::from(total)
    }

    /// Normalized phred likelihoods for `[0/0, 0/1, 1/1]`. Hom-ref is
    /// penalized by the summed ALT base qualities, hom-alt by the summed
    /// REF base qualities and het by the per-read allele split.
    pub fn genotype_likelihoods(&self) -> [u32; 3] {
        let ref_qual_sum: u64 = self.ref_quals.iter().map(|q| u64::from(*q)).sum();
        let alt_qual_sum: u64 = self.alt_quals.iter().map(|q| u64::from(*q)).sum();
        let num_reads = self.total_cov();

        let raw = [
            alt_qual_sum as f64,
            f64::from(num_reads) * HET_PHRED_PER_READ,
            ref_qual_sum as f64,
        ];

        let smallest = raw.iter().cloned().fold(f64::INFINITY, f64::min);
        [
            (raw[0] - smallest).round() as u32,
            (raw[1] - smallest).round() as u32,
            (raw[2] - smallest).round() as u32,
        ]
    }

    /// Genotype index, string and quality from the two smallest PLs.
    pub fn genotype(&self) -> (usize, &'static str, u32) {
        const POSSIBLE_GENOTYPES: [&str; 3] = ["0/0", "0/1", "1/1"];

        if self.total_cov() == 0 {
            return (0, POSSIBLE_GENOTYPES[0], 0);
        }

        let pls = self.genotype_likelihoods();
        let (smallest_idx, second_idx) = first_and_second_smallest_indices(&pls);
        let genotype_quality = pls[second_idx].saturating_sub(pls[smallest_idx]).min(MAX_GENOTYPE_QUALITY);
        (smallest_idx, POSSIBLE_GENOTYPES[smallest_idx], genotype_quality)
    }

    pub fn ref_qual_stats(&self) -> [u32; 4] {
        int_dist_stats(self.ref_quals.iter().map(|q| u32::from(*q)).collect())
    }

    pub fn alt_qual_stats(&self) -> [u32; 4] {
        int_dist_stats(self.alt_quals.iter().map(|q| u32::from(*q)).collect())
    }

    pub fn ref_map_qual_stats(&self) -> [u32; 4] {
        int_dist_stats(self.ref_map_quals.iter().map(|q| u32::from(*q)).collect())
    }

    pub fn alt_map_qual_stats(&self) -> [u32; 4] {
        int_dist_stats(self.alt_map_quals.iter().map(|q| u32::from(*q)).collect())
    }

    pub fn ref_pct_diff_stats(&self) -> [u32; 4] {
        int_dist_stats(self.ref_pct_diffs.iter().map(|pd| (pd * 100.0).round() as u32).collect())
    }

    pub fn alt_pct_diff_stats(&self) -> [u32; 4] {
        int_dist_stats(self.alt_pct_diffs.iter().map(|pd| (pd * 100.0).round() as u32).collect())
    }

    pub fn mean_alt_qual(&self) -> f64 {
        if self.alt_quals.is_empty() {
            return 0.0;
        }
        self.alt_quals.iter().map(|q| f64::from(*q)).sum::<f64>() / self.alt_quals.len() as f64
    }
}

/// Indices of the smallest and second smallest values.
pub fn first_and_second_smallest_indices(values: &[u32; 3]) -> (usize, usize) {
    let mut smallest = 0usize;
    for idx in 1..3 {
        if values[idx] < values[smallest] {
            smallest = idx;
        }
    }

    let mut second = if smallest == 0 { 1 } else { 0 };
    for idx in 0..3 {
        if idx != smallest && values[idx] < values[second] {
            second = idx;
        }
    }

    (smallest, second)
}

/// `(min, median, max, MAD)` of an integer distribution; zeros when empty.
fn int_dist_stats(mut values: Vec<u32>) -> [u32; 4] {
    if values.is_empty() {
        return [0, 0, 0, 0];
    }

    values.sort_unstable();
    let min = values[0];
    let max = *values.last().unwrap();
    let median = values[values.len() / 2];

    let mut abs_devs: Vec<u32> = values
        .iter()
        .map(|val| if *val > median { *val - median } else { median - *val })
        .collect();
    abs_devs.sort_unstable();
    let mad = abs_devs[abs_devs.len() / 2];

    [min, median, max, mad]
}
