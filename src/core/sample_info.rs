use std::path::PathBuf;

use crate::cbdg::Label;

/**
 * Per-sample metadata and window-scoped coverage counters. Samples sort
 * normals before tumors and by name within a tag, which fixes both the
 * read collection order and the VCF sample column order.
 */
#[derive(Debug, Clone)]
pub struct SampleInfo {
    sample_name: String,
    file_path: PathBuf,
    tag: Label,

    pub min_expected_insert: i64,
    pub max_expected_insert: i64,

    num_reads: u64,
    num_bases: u64,
    mean_cov: f64,
    raw_mean_cov: f64,
    pass_read_fraction: f64,
}

impl SampleInfo {
    pub fn new(sample_name: String, file_path: PathBuf, tag: Label) -> Self {
        Self {
            sample_name,
            file_path,
            tag,
            min_expected_insert: 0,
            max_expected_insert: 0,
            num_reads: 0,
            num_bases: 0,
            mean_cov: 0.0,
            raw_mean_cov: 0.0,
            pass_read_fraction: 1.0,
        }
    }

    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    pub fn path(&self) -> &PathBuf {
        &self.file_path
    }

    pub fn tag_kind(&self) -> Label {
        self.tag
    }

    pub fn is_tumor(&self) -> bool {
        self.tag == Label::Tumor
    }

    pub fn is_normal(&self) -> bool {
        self.tag == Label::Normal
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads
    }

    pub fn num_bases(&self) -> u64 {
        self.num_bases
    }

    /// Collected coverage in the window after filters and downsampling.
    pub fn mean_cov(&self) -> f64 {
        self.mean_cov
    }

    /// Estimated coverage in the window before downsampling.
    pub fn raw_mean_cov(&self) -> f64 {
        self.raw_mean_cov
    }

    pub fn pass_read_fraction(&self) -> f64 {
        self.pass_read_fraction
    }

    pub fn set_num_reads(&mut self, num_reads: u64) {
        self.num_reads = num_reads;
    }

    pub fn set_num_bases(&mut self, num_bases: u64) {
        self.num_bases = num_bases;
    }

    pub fn set_raw_mean_cov(&mut self, raw_cov: f64) {
        self.raw_mean_cov = raw_cov;
    }

    pub fn set_pass_read_fraction(&mut self, fraction: f64) {
        self.pass_read_fraction = fraction;
    }

    pub fn calculate_mean_cov(&mut self, region_len: u64) {
        self.mean_cov = self.num_bases as f64 / region_len as f64;
    }

    pub fn total_mean_cov(samples: &[SampleInfo], region_len: u64) -> f64 {
        let total_bases: u64 = samples.iter().map(SampleInfo::num_bases).sum();
        total_bases as f64 / region_len as f64
    }

    pub fn sort_key(&self) -> (Label, &str) {
        (self.tag, self.sample_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_sort_normals_first_then_by_name() {
        let mut samples = vec![
            SampleInfo::new("tumor_b".into(), "t.bam".into(), Label::Tumor),
            SampleInfo::new("normal_z".into(), "n.bam".into(), Label::Normal),
            SampleInfo::new("normal_a".into(), "n2.bam".into(), Label::Normal),
        ];
        samples.sort_by(|lhs, rhs| lhs.sort_key().cmp(&rhs.sort_key()));

        let names: Vec<&str> = samples.iter().map(SampleInfo::sample_name).collect();
        assert_eq!(names, vec!["normal_a", "normal_z", "tumor_b"]);
    }

    #[test]
    fn mean_cov_uses_collected_bases() {
        let mut sample = SampleInfo::new("nml".into(), "n.bam".into(), Label::Normal);
        sample.set_num_bases(5000);
        sample.calculate_mean_cov(1000);
        assert!((sample.mean_cov() - 5.0).abs() < 1e-9);
    }
}
