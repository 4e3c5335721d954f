use std::ffi::CString;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use rust_htslib::faidx;
use rust_htslib::htslib;

use crate::base::rev_comp::normalize_dna;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromInfo {
    pub name: String,
    pub index: usize,
    pub length: u64,
}

/// Parsed samtools-style region: chrom plus optional 1-based closed span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSpec {
    pub chrom_name: String,
    pub start_pos1: Option<u64>,
    pub end_pos1: Option<u64>,
}

/**
 * Reference FASTA collaborator interface: chromosome listing, samtools
 * region parsing and normalized sequence fetch for closed 1-based spans.
 */
pub trait ReferenceFasta {
    fn list_chroms(&self) -> &[ChromInfo];

    fn find_chrom_by_name(&self, name: &str) -> Option<&ChromInfo>;

    /// Uppercase ACGTN sequence for the closed 1-based interval.
    fn fetch_seq(&self, chrom: &str, start_pos1: u64, end_pos1: u64) -> Result<String>;
}

/// Parse `chrom`, `chrom:start`, `chrom:start-end`, `chrom:start-`,
/// `chrom:-end` and `{chrom}:start-end` (for names containing a colon).
pub fn parse_region_spec(spec: &str) -> Result<RegionSpec> {
    if spec.is_empty() {
        bail!("empty region specification");
    }

    let (chrom_name, span_text) = if let Some(stripped) = spec.strip_prefix('{') {
        let close_idx = stripped
            .find('}')
            .ok_or_else(|| anyhow!("missing closing brace in region {spec}"))?;
        let name = &stripped[..close_idx];
        let rest = &stripped[close_idx + 1..];
        let span = rest.strip_prefix(':').unwrap_or("");
        (name.to_string(), span.to_string())
    } else {
        match spec.find(':') {
            Some(colon_idx) => (spec[..colon_idx].to_string(), spec[colon_idx + 1..].to_string()),
            None => (spec.to_string(), String::new()),
        }
    };

    if chrom_name.is_empty() {
        bail!("missing chromosome name in region {spec}");
    }

    if span_text.is_empty() {
        return Ok(RegionSpec {
            chrom_name,
            start_pos1: None,
            end_pos1: None,
        });
    }

    let parse_pos = |text: &str| -> Result<u64> {
        text.replace(',', "")
            .parse::<u64>()
            .with_context(|| format!("invalid position {text} in region {spec}"))
    };

    let (start_text, end_text) = match span_text.find('-') {
        Some(dash_idx) => (&span_text[..dash_idx], &span_text[dash_idx + 1..]),
        None => (span_text.as_str(), ""),
    };

    let start_pos1 = if start_text.is_empty() { None } else { Some(parse_pos(start_text)?) };
    let end_pos1 = if end_text.is_empty() {
        // `chrom:start` without a dash means a single base span
        if span_text.contains('-') { None } else { start_pos1 }
    } else {
        Some(parse_pos(end_text)?)
    };

    if let (Some(start), Some(end)) = (start_pos1, end_pos1) {
        if start == 0 || end < start {
            bail!("invalid span {start}-{end} in region {spec}");
        }
    }

    Ok(RegionSpec {
        chrom_name,
        start_pos1,
        end_pos1,
    })
}

/// Build a samtools region string, `{}`-quoting colon-containing names.
pub fn make_samtools_region(chrom_name: &str, start_pos1: u64, end_pos1: u64) -> String {
    if chrom_name.contains(':') {
        format!("{{{chrom_name}}}:{start_pos1}-{end_pos1}")
    } else {
        format!("{chrom_name}:{start_pos1}-{end_pos1}")
    }
}

/// Open a raw faidx handle for sequence-length lookups. `faidx::Reader`
/// does not expose its inner pointer, so the length query goes straight
/// through the htslib bindings.
fn open_raw_faidx(fasta_path: &Path) -> Result<*mut htslib::faidx_t> {
    let cpath = CString::new(fasta_path.as_os_str().to_string_lossy().as_bytes())
        .with_context(|| format!("invalid reference path {}", fasta_path.display()))?;
    let raw_fai = unsafe { htslib::fai_load(cpath.as_ptr()) };
    if raw_fai.is_null() {
        bail!("could not open reference FASTA {}", fasta_path.display());
    }
    Ok(raw_fai)
}

/// Look up the length of a sequence via the raw htslib faidx handle.
fn seq_len(raw_fai: *mut htslib::faidx_t, name: &str) -> Result<u64> {
    let cname = CString::new(name).with_context(|| format!("invalid sequence name {name}"))?;
    let length = unsafe { htslib::faidx_seq_len(raw_fai, cname.as_ptr()) };
    if length < 0 {
        bail!("could not determine length of sequence {name}");
    }
    Ok(length as u64)
}

/// Indexed FASTA reader. Each worker thread opens its own so the
/// underlying file descriptor never becomes a shared lock.
pub struct FastaReference {
    fasta_path: PathBuf,
    reader: faidx::Reader,
    chroms: Vec<ChromInfo>,
}

impl FastaReference {
    pub fn open(fasta_path: &Path) -> Result<Self> {
        let reader = faidx::Reader::from_path(fasta_path)
            .with_context(|| format!("could not open reference FASTA {}", fasta_path.display()))?;

        let raw_fai = open_raw_faidx(fasta_path)?;

        let mut chroms = Vec::with_capacity(reader.n_seqs() as usize);
        for index in 0..reader.n_seqs() {
            let name = reader
                .seq_name(index as i32)
                .with_context(|| format!("could not read sequence name {index} from FASTA index"))?;
            let length = seq_len(raw_fai, &name)?;
            chroms.push(ChromInfo {
                name,
                index: index as usize,
                length,
            });
        }

        unsafe {
            htslib::fai_destroy(raw_fai);
        }

        Ok(Self {
            fasta_path: fasta_path.to_path_buf(),
            reader,
            chroms,
        })
    }

    pub fn fasta_path(&self) -> &Path {
        &self.fasta_path
    }

    /// Resolve a region spec against the reference: fill open ends with
    /// the chromosome bounds and validate the chromosome exists.
    pub fn resolve_region(&self, spec: &str) -> Result<(ChromInfo, u64, u64)> {
        let parsed = parse_region_spec(spec)?;
        let chrom = self
            .find_chrom_by_name(&parsed.chrom_name)
            .ok_or_else(|| anyhow!("chromosome {} not found in reference", parsed.chrom_name))?
            .clone();

        let start_pos1 = parsed.start_pos1.unwrap_or(1);
        let end_pos1 = parsed.end_pos1.unwrap_or(chrom.length);
        if end_pos1 > chrom.length {
            bail!("region {spec} extends past the end of {} ({}bp)", chrom.name, chrom.length);
        }

        Ok((chrom, start_pos1, end_pos1))
    }
}

impl ReferenceFasta for FastaReference {
    fn list_chroms(&self) -> &[ChromInfo] {
        &self.chroms
    }

    fn find_chrom_by_name(&self, name: &str) -> Option<&ChromInfo> {
        self.chroms.iter().find(|chrom| chrom.name == name)
    }

    fn fetch_seq(&self, chrom: &str, start_pos1: u64, end_pos1: u64) -> Result<String> {
        let raw_seq = self
            .reader
            .fetch_seq(chrom, start_pos1 as usize - 1, end_pos1 as usize - 1)
            .with_context(|| format!("could not fetch {chrom}:{start_pos1}-{end_pos1} from reference"))?;

        let text = std::str::from_utf8(raw_seq).context("reference sequence is not valid UTF-8")?;
        Ok(normalize_dna(text))
    }
}
