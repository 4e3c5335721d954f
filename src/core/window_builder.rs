use std::collections::BTreeSet;
use std::fs::read_to_string;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use crate::core::window::Window;
use crate::hts::reference::{parse_region_spec, ReferenceFasta};

pub const DEFAULT_WINDOW_LENGTH: u64 = 1000;
pub const DEFAULT_REGION_PADDING: u64 = 500;
pub const DEFAULT_PCT_OVERLAP: u64 = 50;

pub const MIN_ALLOWED_WINDOW_LEN: u64 = 500;
pub const MAX_ALLOWED_WINDOW_LEN: u64 = 5000;
pub const MAX_ALLOWED_REGION_PAD: u64 = 1000;
pub const MIN_ALLOWED_PCT_OVERLAP: u64 = 50;
pub const MAX_ALLOWED_PCT_OVERLAP: u64 = 90;

#[derive(Debug, Clone)]
pub struct WindowBuilderParams {
    pub window_length: u64,
    pub region_padding: u64,
    pub percent_overlap: u64,
}

impl Default for WindowBuilderParams {
    fn default() -> Self {
        Self {
            window_length: DEFAULT_WINDOW_LENGTH,
            region_padding: DEFAULT_REGION_PADDING,
            percent_overlap: DEFAULT_PCT_OVERLAP,
        }
    }
}

/// Chromosomes never assembled: mitochondria, unplaced/decoy contigs and
/// HLA alts.
pub fn should_exclude_chrom(chrom: &str) -> bool {
    chrom == "MT"
        || chrom == "chrM"
        || chrom.starts_with("GL")
        || chrom.starts_with("chrUn")
        || chrom.starts_with("chrEBV")
        || chrom.starts_with("HLA-")
        || chrom.ends_with("_random")
        || chrom.ends_with("_alt")
        || chrom.ends_with("_decoy")
}

/**
 * Partitions the input regions into padded, overlapping fixed-size
 * windows. All input validation errors here are fatal: they surface
 * before any worker thread starts.
 */
pub struct WindowBuilder<'a> {
    params: WindowBuilderParams,
    reference: &'a dyn ReferenceFasta,
    // chrom_name, optional 1-based closed span
    input_regions: Vec<(String, Option<u64>, Option<u64>)>,
}

impl<'a> WindowBuilder<'a> {
    pub fn new(reference: &'a dyn ReferenceFasta, params: WindowBuilderParams) -> Self {
        Self {
            params,
            reference,
            input_regions: Vec::with_capacity(1024),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input_regions.is_empty()
    }

    pub fn step_size(params: &WindowBuilderParams) -> u64 {
        let val = ((100 - params.percent_overlap) as f64 / 100.0) * params.window_length as f64;
        // round so that steps always move in multiples of 100
        ((val / 100.0).ceil() * 100.0) as u64
    }

    pub fn add_all_reference_regions(&mut self) {
        for chrom in self.reference.list_chroms() {
            if should_exclude_chrom(&chrom.name) {
                continue;
            }
            self.input_regions.push((chrom.name.clone(), Some(1), Some(chrom.length)));
        }
    }

    pub fn add_region(&mut self, region_spec: &str) -> Result<()> {
        let parsed = parse_region_spec(region_spec)?;
        if self.reference.find_chrom_by_name(&parsed.chrom_name).is_none() {
            bail!("chromosome {} from region {region_spec} not found in reference", parsed.chrom_name);
        }
        self.input_regions.push((parsed.chrom_name, parsed.start_pos1, parsed.end_pos1));
        Ok(())
    }

    pub fn add_batch_regions(&mut self, region_specs: &[String]) -> Result<()> {
        for spec in region_specs {
            self.add_region(spec)?;
        }
        Ok(())
    }

    pub fn add_bed_file(&mut self, bed_file: &Path) -> Result<()> {
        let contents = read_to_string(bed_file)
            .with_context(|| format!("could not read BED file {}", bed_file.display()))?;

        for (line_idx, line) in contents.lines().enumerate() {
            let line_num = line_idx + 1;
            if line.starts_with('#') || line.is_empty() {
                continue;
            }

            let tokens: Vec<&str> = line.split('\t').collect();
            if tokens.len() != 3 {
                bail!("invalid bed line with {} columns at line number {line_num}", tokens.len());
            }

            let region_start: u64 = tokens[1]
                .parse()
                .with_context(|| format!("could not parse start at line {line_num} in {}", bed_file.display()))?;
            let region_end: u64 = tokens[2]
                .parse()
                .with_context(|| format!("could not parse end at line {line_num} in {}", bed_file.display()))?;

            if self.reference.find_chrom_by_name(tokens[0]).is_none() {
                bail!("chromosome {} from bed file line {line_num} not found in reference", tokens[0]);
            }

            // BED spans are 0-based half open
            self.input_regions
                .push((tokens[0].to_string(), Some(region_start + 1), Some(region_end)));
        }

        Ok(())
    }

    /// Deduplicated windows sorted by `(chrom_index, start1, end1)` with
    /// genome indices assigned.
    pub fn build_windows(&self) -> Result<Vec<Window>> {
        if self.input_regions.is_empty() {
            return Ok(Vec::new());
        }

        let window_len = self.params.window_length;
        info!(
            "Using {} input region(s) to build {}bp moving windows with {}% overlap",
            self.input_regions.len(),
            window_len,
            self.params.percent_overlap
        );

        let step_size = Self::step_size(&self.params);
        let mut uniq_windows: BTreeSet<(usize, u64, u64, String)> = BTreeSet::new();

        for (chrom_name, span_start, span_end) in &self.input_regions {
            let chrom = self
                .reference
                .find_chrom_by_name(chrom_name)
                .ok_or_else(|| anyhow!("no chromosome named {chrom_name} found in reference"))?
                .clone();

            let (start_pos1, end_pos1) = self.pad_input_region(span_start.unwrap_or(1), span_end.unwrap_or(chrom.length), chrom.length);

            if end_pos1 - start_pos1 + 1 <= window_len {
                uniq_windows.insert((chrom.index, start_pos1, end_pos1, chrom.name.clone()));
                continue;
            }

            let mut curr_window_start = start_pos1;
            while curr_window_start + window_len <= end_pos1 {
                let curr_window_end = curr_window_start + window_len;
                uniq_windows.insert((chrom.index, curr_window_start, curr_window_end, chrom.name.clone()));
                curr_window_start += step_size;
            }
        }

        let mut results: Vec<Window> = uniq_windows
            .into_iter()
            .map(|(chrom_index, start_pos1, end_pos1, chrom_name)| {
                Window::new(chrom_index, chrom_name, start_pos1, end_pos1)
            })
            .collect();

        results.sort_by_key(|window| (window.chrom_index(), window.start_pos1(), window.end_pos1()));
        for (current_idx, window) in results.iter_mut().enumerate() {
            window.set_genome_index(current_idx);
        }

        Ok(results)
    }

    /// Pad both sides, clamp to the chromosome and grow short regions to
    /// at least one window length.
    fn pad_input_region(&self, curr_start: u64, curr_end: u64, contig_max_len: u64) -> (u64, u64) {
        let padding = self.params.region_padding;

        let mut start_pos1 = if curr_start <= padding { 1 } else { curr_start - padding };
        let mut end_pos1 = (curr_end + padding).min(contig_max_len);

        let length = end_pos1 - start_pos1 + 1;
        if length < self.params.window_length {
            // grow to window_length + 1 so short regions come out the same
            // size as tiled windows, whose end is start + window_length
            let diff = self.params.window_length + 1 - length;
            let left_flank = (diff / 2).min(start_pos1 - 1);
            start_pos1 -= left_flank;
            end_pos1 = (end_pos1 + (diff - left_flank)).min(contig_max_len);
        }

        (start_pos1, end_pos1)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::hts::reference::ChromInfo;

    struct MockReference {
        chroms: Vec<ChromInfo>,
    }

    impl MockReference {
        fn new(lengths: &[(&str, u64)]) -> Self {
            let chroms = lengths
                .iter()
                .enumerate()
                .map(|(index, (name, length))| ChromInfo {
                    name: name.to_string(),
                    index,
                    length: *length,
                })
                .collect();
            Self { chroms }
        }
    }

    impl ReferenceFasta for MockReference {
        fn list_chroms(&self) -> &[ChromInfo] {
            &self.chroms
        }

        fn find_chrom_by_name(&self, name: &str) -> Option<&ChromInfo> {
            self.chroms.iter().find(|chrom| chrom.name == name)
        }

        fn fetch_seq(&self, _chrom: &str, _start_pos1: u64, _end_pos1: u64) -> Result<String> {
            unreachable!("window building never fetches sequence")
        }
    }

    #[test]
    fn step_size_moves_in_multiples_of_100() {
        let params = WindowBuilderParams::default();
        assert_eq!(WindowBuilder::step_size(&params), 500);

        let tight = WindowBuilderParams {
            window_length: 1000,
            percent_overlap: 90,
            ..Default::default()
        };
        assert_eq!(WindowBuilder::step_size(&tight), 100);
    }

    #[test]
    fn short_region_becomes_one_padded_window() {
        let reference = MockReference::new(&[("chr1", 1_000_000)]);
        let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
        builder.add_region("chr1:5000-5100").unwrap();

        let windows = builder.build_windows().unwrap();
        assert_eq!(windows.len(), 1);

        // 100bp span padded by 500 on both sides yields one window that
        // still covers the whole input span
        let window = &windows[0];
        assert_eq!(window.start_pos1(), 4500);
        assert_eq!(window.end_pos1(), 5500);
        assert!(window.start_pos1() <= 5000 && window.end_pos1() >= 5100);
        assert_eq!(window.length(), 1001);
    }

    #[test]
    fn long_region_slides_windows_at_fixed_stride() {
        let reference = MockReference::new(&[("chr1", 1_000_000)]);
        let params = WindowBuilderParams {
            region_padding: 0,
            ..Default::default()
        };
        let mut builder = WindowBuilder::new(&reference, params);
        builder.add_region("chr1:1-10000").unwrap();

        let windows = builder.build_windows().unwrap();
        assert!(windows.len() > 10);

        for pair in windows.windows(2) {
            assert_eq!(pair[1].start_pos1() - pair[0].start_pos1(), 500);
            assert_eq!(pair[0].length(), 1001);
        }

        // genome indices are sequential
        for (idx, window) in windows.iter().enumerate() {
            assert_eq!(window.genome_index(), idx);
        }
    }

    #[test]
    fn unpadded_short_region_expands_to_the_tiled_window_length() {
        let reference = MockReference::new(&[("chr1", 1_000_000)]);
        let params = WindowBuilderParams {
            region_padding: 0,
            ..Default::default()
        };
        let mut builder = WindowBuilder::new(&reference, params);
        builder.add_region("chr1:5000-5100").unwrap();

        let windows = builder.build_windows().unwrap();
        assert_eq!(windows.len(), 1);

        // short regions grow to the same size tiled windows have
        let window = &windows[0];
        assert_eq!(window.length(), 1001);
        assert_eq!(window.start_pos1(), 4550);
        assert_eq!(window.end_pos1(), 5550);
    }

    #[test]
    fn short_region_expansion_clamps_at_the_chromosome_start() {
        let reference = MockReference::new(&[("chr1", 1_000_000)]);
        let params = WindowBuilderParams {
            region_padding: 0,
            ..Default::default()
        };
        let mut builder = WindowBuilder::new(&reference, params);
        builder.add_region("chr1:10-100").unwrap();

        let windows = builder.build_windows().unwrap();
        assert_eq!(windows.len(), 1);

        // the missing left flank is pushed onto the right side
        let window = &windows[0];
        assert_eq!(window.start_pos1(), 1);
        assert_eq!(window.length(), 1001);
    }

    #[test]
    fn duplicate_regions_are_deduplicated() {
        let reference = MockReference::new(&[("chr1", 1_000_000)]);
        let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
        builder.add_region("chr1:5000-5100").unwrap();
        builder.add_region("chr1:5000-5100").unwrap();

        let windows = builder.build_windows().unwrap();
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn build_is_deterministic() {
        let reference = MockReference::new(&[("chr2", 500_000), ("chr1", 1_000_000)]);
        let build = || {
            let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
            builder.add_region("chr1:1-20000").unwrap();
            builder.add_region("chr2:1-20000").unwrap();
            builder
                .build_windows()
                .unwrap()
                .iter()
                .map(|w| (w.chrom_index(), w.start_pos1(), w.end_pos1()))
                .collect::<Vec<_>>()
        };

        assert_eq!(build(), build());
    }

    #[test]
    fn excluded_chroms_are_skipped_in_whole_genome_mode() {
        let reference = MockReference::new(&[("chr1", 5000), ("chrM", 16_000), ("chr1_random", 4000), ("HLA-A", 3000)]);
        let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
        builder.add_all_reference_regions();

        let windows = builder.build_windows().unwrap();
        assert!(windows.iter().all(|w| w.chrom_name() == "chr1"));
        assert!(!windows.is_empty());
    }

    #[test]
    fn unknown_chrom_is_a_fatal_error() {
        let reference = MockReference::new(&[("chr1", 5000)]);
        let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
        assert!(builder.add_region("chr9:1-100").is_err());
    }

    #[test]
    fn bed_spans_are_converted_to_one_based(){
        let reference = MockReference::new(&[("chr1", 1_000_000)]);
        let dir = tempfile::tempdir().unwrap();
        let bed_path = dir.path().join("regions.bed");
        std::fs::write(&bed_path, "chr1\t999\t2000\n#comment\n").unwrap();

        let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
        builder.add_bed_file(&bed_path).unwrap();
        let windows = builder.build_windows().unwrap();
        assert!(!windows.is_empty());
        // padded window still covers the 1-based 1000-2000 span
        assert!(windows[0].start_pos1() <= 1000);
        assert!(windows.last().unwrap().end_pos1() >= 2000);

        let bad_bed = dir.path().join("bad.bed");
        std::fs::write(&bad_bed, "chr1\t10\n").unwrap();
        let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
        assert!(builder.add_bed_file(&bad_bed).is_err());
    }
}
