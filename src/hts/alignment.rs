use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::{self, Read as BamRead};

use crate::hts::reference::ChromInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    AlignmentMatch,
    Insertion,
    Deletion,
    RefSkip,
    SoftClip,
    HardClip,
    Pad,
    SequenceMatch,
    SequenceMismatch,
}

impl CigarOp {
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            CigarOp::AlignmentMatch
                | CigarOp::Deletion
                | CigarOp::RefSkip
                | CigarOp::SequenceMatch
                | CigarOp::SequenceMismatch
        )
    }

    pub fn consumes_query(&self) -> bool {
        matches!(
            self,
            CigarOp::AlignmentMatch
                | CigarOp::Insertion
                | CigarOp::SoftClip
                | CigarOp::SequenceMatch
                | CigarOp::SequenceMismatch
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CigarUnit {
    pub op: CigarOp,
    pub length: u32,
}

/// SAM bitwise flag with named accessors for the bits the caller reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitFlag(pub u16);

impl BitFlag {
    pub fn is_paired_in_sequencing(&self) -> bool {
        self.0 & 0x1 != 0
    }

    pub fn is_mapped_proper_pair(&self) -> bool {
        self.0 & 0x2 != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.0 & 0x4 != 0
    }

    pub fn is_mate_unmapped(&self) -> bool {
        self.0 & 0x8 != 0
    }

    pub fn is_reverse_strand(&self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn is_mate_reverse_strand(&self) -> bool {
        self.0 & 0x20 != 0
    }

    pub fn is_read1(&self) -> bool {
        self.0 & 0x40 != 0
    }

    pub fn is_read2(&self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn is_secondary(&self) -> bool {
        self.0 & 0x100 != 0
    }

    pub fn is_qc_fail(&self) -> bool {
        self.0 & 0x200 != 0
    }

    pub fn is_duplicate(&self) -> bool {
        self.0 & 0x400 != 0
    }

    pub fn is_supplementary(&self) -> bool {
        self.0 & 0x800 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MateInfo {
    pub chrom_index: i32,
    pub mate_start_pos0: i64,
}

/// One decoded alignment record with the fields and aux tags the read
/// collector consumes.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub qname: String,
    pub chrom_index: i32,
    pub start_pos0: i64,
    pub mate_chrom_index: i32,
    pub mate_start_pos0: i64,
    pub insert_size: i64,
    pub flag: BitFlag,
    pub map_qual: u8,
    pub sequence: String,
    pub quals: Vec<u8>,
    pub cigar: Vec<CigarUnit>,

    pub md_tag: Option<String>,
    pub aln_score: Option<i64>,
    pub sub_optimal_score: Option<i64>,
    pub has_xt_tag: bool,
    pub has_xa_tag: bool,
    pub has_sa_tag: bool,
}

impl Alignment {
    pub fn length(&self) -> usize {
        self.sequence.len()
    }

    pub fn mate_info(&self) -> MateInfo {
        MateInfo {
            chrom_index: self.mate_chrom_index,
            mate_start_pos0: self.mate_start_pos0,
        }
    }

    /// 0-based exclusive reference end derived from the cigar.
    pub fn end_pos0(&self) -> i64 {
        let ref_len: i64 = self
            .cigar
            .iter()
            .filter(|unit| unit.op.consumes_reference())
            .map(|unit| i64::from(unit.length))
            .sum();
        self.start_pos0 + ref_len
    }

    pub fn mate_overlaps_region(&self, chrom_index: usize, start_pos0: i64, end_pos0: i64) -> bool {
        self.mate_chrom_index == chrom_index as i32
            && self.mate_start_pos0 >= start_pos0
            && self.mate_start_pos0 < end_pos0
    }
}

/**
 * Region-scoped forward stream of alignments, the collaborator seam in
 * front of htslib. The read collector and the active-region scan work
 * against this trait so tests can feed synthetic alignments.
 */
pub trait AlignmentStream {
    fn set_region(&mut self, chrom_name: &str, start_pos1: u64, end_pos1: u64) -> Result<()>;

    /// Next record in the active region, or `None` when exhausted.
    fn read_next(&mut self) -> Result<Option<Alignment>>;
}

/// BAM/CRAM extractor backed by `bam::IndexedReader`.
pub struct BamExtractor {
    reader: bam::IndexedReader,
    record: bam::Record,
    sample_name: String,
    chrom_names: Vec<String>,
    region_active: bool,
}

impl BamExtractor {
    pub fn open(aln_path: &Path, ref_path: &Path) -> Result<Self> {
        let mut reader = bam::IndexedReader::from_path(aln_path)
            .with_context(|| format!("could not open alignment file {}", aln_path.display()))?;
        reader
            .set_reference(ref_path)
            .with_context(|| format!("could not set reference {} for CRAM decoding", ref_path.display()))?;

        let sample_name = read_group_sample(&reader, aln_path)?;
        let header = reader.header();
        let chrom_names = header
            .target_names()
            .iter()
            .map(|name| String::from_utf8_lossy(name).to_string())
            .collect();

        Ok(Self {
            reader,
            record: bam::Record::new(),
            sample_name,
            chrom_names,
            region_active: false,
        })
    }

    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    pub fn chrom_name(&self, chrom_index: i32) -> Option<&str> {
        if chrom_index < 0 {
            return None;
        }
        self.chrom_names.get(chrom_index as usize).map(String::as_str)
    }

    /// Check that every alignment header contig exists in the reference
    /// with a matching length.
    pub fn check_contigs_match(&self, ref_chroms: &[ChromInfo]) -> Result<()> {
        let header = self.reader.header();
        for tid in 0..header.target_count() {
            let name = String::from_utf8_lossy(header.target_names()[tid as usize]).to_string();
            let length = header.target_len(tid).unwrap_or(0);

            match ref_chroms.iter().find(|chrom| chrom.name == name) {
                Some(chrom) if chrom.length == length => {}
                Some(chrom) => bail!(
                    "contig {name} length mismatch: {length} in alignments, {} in reference",
                    chrom.length
                ),
                None => bail!("contig {name} from alignment header not found in reference"),
            }
        }
        Ok(())
    }

    fn decode_record(&self) -> Alignment {
        let record = &self.record;

        let cigar = record
            .cigar()
            .iter()
            .map(|unit| {
                use rust_htslib::bam::record::Cigar;
                let (op, length) = match unit {
                    Cigar::Match(len) => (CigarOp::AlignmentMatch, *len),
                    Cigar::Ins(len) => (CigarOp::Insertion, *len),
                    Cigar::Del(len) => (CigarOp::Deletion, *len),
                    Cigar::RefSkip(len) => (CigarOp::RefSkip, *len),
                    Cigar::SoftClip(len) => (CigarOp::SoftClip, *len),
                    Cigar::HardClip(len) => (CigarOp::HardClip, *len),
                    Cigar::Pad(len) => (CigarOp::Pad, *len),
                    Cigar::Equal(len) => (CigarOp::SequenceMatch, *len),
                    Cigar::Diff(len) => (CigarOp::SequenceMismatch, *len),
                };
                CigarUnit { op, length }
            })
            .collect();

        Alignment {
            qname: String::from_utf8_lossy(record.qname()).to_string(),
            chrom_index: record.tid(),
            start_pos0: record.pos(),
            mate_chrom_index: record.mtid(),
            mate_start_pos0: record.mpos(),
            insert_size: record.insert_size(),
            flag: BitFlag(record.flags()),
            map_qual: record.mapq(),
            sequence: String::from_utf8_lossy(&record.seq().as_bytes()).to_string(),
            quals: record.qual().to_vec(),
            cigar,
            md_tag: aux_string(record, b"MD"),
            aln_score: aux_int(record, b"AS"),
            sub_optimal_score: aux_int(record, b"XS"),
            has_xt_tag: record.aux(b"XT").is_ok(),
            has_xa_tag: record.aux(b"XA").is_ok(),
            has_sa_tag: record.aux(b"SA").is_ok(),
        }
    }
}

impl AlignmentStream for BamExtractor {
    fn set_region(&mut self, chrom_name: &str, start_pos1: u64, end_pos1: u64) -> Result<()> {
        let tid = self
            .reader
            .header()
            .tid(chrom_name.as_bytes())
            .ok_or_else(|| anyhow!("chromosome {chrom_name} not found in alignment header"))?;

        self.reader
            .fetch((tid as i32, start_pos1 as i64 - 1, end_pos1 as i64))
            .with_context(|| format!("could not fetch {chrom_name}:{start_pos1}-{end_pos1}"))?;
        self.region_active = true;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Alignment>> {
        if !self.region_active {
            return Ok(None);
        }

        match self.reader.read(&mut self.record) {
            Some(Ok(())) => Ok(Some(self.decode_record())),
            Some(Err(err)) => Err(err).context("failed to read alignment record"),
            None => Ok(None),
        }
    }
}

fn read_group_sample(reader: &bam::IndexedReader, aln_path: &Path) -> Result<String> {
    let header = bam::Header::from_template(reader.header());
    let records = header.to_hashmap();

    if let Some(read_groups) = records.get("RG") {
        for read_group in read_groups {
            if let Some(sample) = read_group.get("SM") {
                return Ok(sample.clone());
            }
        }
    }

    // fall back to the file stem when no read group names a sample
    aln_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("could not derive sample name for {}", aln_path.display()))
}

fn aux_string(record: &bam::Record, tag: &[u8]) -> Option<String> {
    match record.aux(tag) {
        Ok(Aux::String(value)) => Some(value.to_string()),
        _ => None,
    }
}

fn aux_int(record: &bam::Record, tag: &[u8]) -> Option<i64> {
    match record.aux(tag) {
        Ok(Aux::I8(value)) => Some(i64::from(value)),
        Ok(Aux::U8(value)) => Some(i64::from(value)),
        Ok(Aux::I16(value)) => Some(i64::from(value)),
        Ok(Aux::U16(value)) => Some(i64::from(value)),
        Ok(Aux::I32(value)) => Some(i64::from(value)),
        Ok(Aux::U32(value)) => Some(i64::from(value)),
        _ => None,
    }
}

/// In-memory stream for tests and synthetic pipelines.
pub struct VecAlignmentStream {
    alignments: Vec<Alignment>,
    cursor: usize,
    region: Option<(String, u64, u64)>,
}

impl VecAlignmentStream {
    pub fn new(alignments: Vec<Alignment>) -> Self {
        Self {
            alignments,
            cursor: 0,
            region: None,
        }
    }
}

impl AlignmentStream for VecAlignmentStream {
    fn set_region(&mut self, chrom_name: &str, start_pos1: u64, end_pos1: u64) -> Result<()> {
        self.region = Some((chrom_name.to_string(), start_pos1, end_pos1));
        self.cursor = 0;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Alignment>> {
        let (_, start_pos1, end_pos1) = match &self.region {
            Some(region) => region.clone(),
            None => return Ok(None),
        };

        while self.cursor < self.alignments.len() {
            let aln = &self.alignments[self.cursor];
            self.cursor += 1;

            let overlaps = aln.end_pos0() > start_pos1 as i64 - 1 && aln.start_pos0 < end_pos1 as i64;
            if overlaps {
                return Ok(Some(aln.clone()));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitflag_decodes_standard_bits() {
        // paired, proper pair, mate reverse, first in template, duplicate
        let flag = BitFlag(0x1 | 0x2 | 0x20 | 0x40 | 0x400);
        assert!(flag.is_paired_in_sequencing());
        assert!(flag.is_mapped_proper_pair());
        assert!(flag.is_mate_reverse_strand());
        assert!(flag.is_read1());
        assert!(flag.is_duplicate());
        assert!(!flag.is_secondary());
        assert!(!flag.is_reverse_strand());
    }

    #[test]
    fn cigar_reference_span_drives_end_pos() {
        let aln = Alignment {
            qname: "q".into(),
            chrom_index: 0,
            start_pos0: 100,
            mate_chrom_index: 0,
            mate_start_pos0: 300,
            insert_size: 350,
            flag: BitFlag(0x1),
            map_qual: 60,
            sequence: "A".repeat(100),
            quals: vec![30; 100],
            cigar: vec![
                CigarUnit { op: CigarOp::SoftClip, length: 10 },
                CigarUnit { op: CigarOp::AlignmentMatch, length: 60 },
                CigarUnit { op: CigarOp::Deletion, length: 5 },
                CigarUnit { op: CigarOp::AlignmentMatch, length: 30 },
            ],
            md_tag: None,
            aln_score: None,
            sub_optimal_score: None,
            has_xt_tag: false,
            has_xa_tag: false,
            has_sa_tag: false,
        };

        assert_eq!(aln.end_pos0(), 100 + 60 + 5 + 30);
        assert!(aln.mate_overlaps_region(0, 250, 400));
        assert!(!aln.mate_overlaps_region(1, 250, 400));
    }
}
