//! Integration tests driving the pipeline against real BAM/CRAM and FASTA
//! fixtures written with rust-htslib, from read collection through the
//! bgzip-compressed, genome-sorted VCF output.

use std::io::Read as IoRead;
use std::path::{Path, PathBuf};

use rust_htslib::bam;
use rust_htslib::bam::header::{Header, HeaderRecord};
use rust_htslib::bam::record::{Aux, Cigar, CigarString};
use rust_htslib::bgzf;

use lancet::cli::pipeline_runner::PipelineRunner;
use lancet::cli::CliParams;
use lancet::core::read_collector::ReadCollectorParams;
use lancet::core::variant_builder::{StatusCode, VariantBuilder, VariantBuilderParams};
use lancet::core::window_builder::{WindowBuilder, WindowBuilderParams};
use lancet::hts::reference::FastaReference;

const READ_LEN: usize = 101;
const CHROM_LEN: usize = 2000;
const SNV_POS0: usize = 600; // reference G, tumor alt A

fn deterministic_dna(seed: u64, len: usize) -> String {
    const BASES: [char; 4] = ['A', 'C', 'G', 'T'];
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            BASES[(state % 4) as usize]
        })
        .collect()
}

fn chrom_seq() -> String {
    deterministic_dna(31337, CHROM_LEN)
}

fn write_fasta(dir: &Path, name: &str, seq: &str) -> PathBuf {
    let path = dir.join(format!("{name}.fa"));
    std::fs::write(&path, format!(">chr1\n{seq}\n")).unwrap();
    path
}

struct BamSpec {
    qname: String,
    start0: usize,
    sequence: String,
    md: String,
    reverse: bool,
}

fn write_bam(dir: &Path, file_stem: &str, sample: &str, specs: &[BamSpec]) -> PathBuf {
    let path = dir.join(format!("{file_stem}.bam"));

    let mut header = Header::new();
    let mut hd_rec = HeaderRecord::new(b"HD");
    hd_rec.push_tag(b"VN", &"1.6");
    hd_rec.push_tag(b"SO", &"coordinate");
    header.push_record(&hd_rec);

    let mut sq_rec = HeaderRecord::new(b"SQ");
    sq_rec.push_tag(b"SN", &"chr1");
    sq_rec.push_tag(b"LN", &CHROM_LEN);
    header.push_record(&sq_rec);

    let mut rg_rec = HeaderRecord::new(b"RG");
    rg_rec.push_tag(b"ID", &"rg1");
    rg_rec.push_tag(b"SM", &sample);
    header.push_record(&rg_rec);

    {
        let mut writer = bam::Writer::from_path(&path, &header, bam::Format::Bam).unwrap();
        for spec in specs {
            let mut record = bam::Record::new();
            let cigar = CigarString(vec![Cigar::Match(READ_LEN as u32)]);
            let quals = vec![35u8; READ_LEN];
            record.set(spec.qname.as_bytes(), Some(&cigar), spec.sequence.as_bytes(), &quals);
            record.set_tid(0);
            record.set_pos(spec.start0 as i64);
            record.set_mapq(60);
            record.set_mtid(0);
            record.set_mpos(spec.start0 as i64);
            record.set_insert_size(251);

            let mut flags = 0x1u16 | 0x2; // paired, proper pair
            if spec.reverse {
                flags |= 0x10;
            }
            record.set_flags(flags);
            record.push_aux(b"MD", Aux::String(spec.md.as_str())).unwrap();
            writer.write(&record).unwrap();
        }
    }

    bam::index::build(path.as_path(), None, bam::index::Type::Bai, 1).unwrap();
    path
}

/// Tiling reads over the chromosome; `alt_every` > 0 puts the SNV allele
/// on every n-th read covering the site.
fn tiled_specs(seq: &str, alt_every: usize, qname_prefix: &str) -> Vec<BamSpec> {
    let mut specs = Vec::new();
    let mut start = 0usize;
    let mut read_idx = 0usize;

    while start + READ_LEN <= seq.len() {
        let covers_snv = start <= SNV_POS0 && SNV_POS0 < start + READ_LEN;
        let make_alt = alt_every > 0 && read_idx % alt_every == 1;

        let (sequence, md) = if covers_snv && make_alt {
            let offset = SNV_POS0 - start;
            let mut bases = seq[start..start + READ_LEN].to_string().into_bytes();
            bases[offset] = b'A';
            (
                String::from_utf8(bases).unwrap(),
                format!("{}G{}", offset, READ_LEN - offset - 1),
            )
        } else {
            (seq[start..start + READ_LEN].to_string(), format!("{READ_LEN}"))
        };

        specs.push(BamSpec {
            qname: format!("{qname_prefix}{start}"),
            start0: start,
            sequence,
            md,
            reverse: read_idx % 2 == 1,
        });

        start += 5;
        read_idx += 1;
    }

    specs
}

fn builder_params(ref_path: &Path, normal: &Path, tumor: &Path) -> VariantBuilderParams {
    VariantBuilderParams {
        read_collector: ReadCollectorParams {
            normal_paths: vec![normal.to_path_buf()],
            tumor_paths: vec![tumor.to_path_buf()],
            ref_path: ref_path.to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn first_window(ref_path: &Path) -> lancet::core::window::Window {
    let reference = FastaReference::open(ref_path).unwrap();
    let mut builder = WindowBuilder::new(&reference, WindowBuilderParams::default());
    builder.add_region("chr1").unwrap();
    builder.build_windows().unwrap().into_iter().next().unwrap()
}

#[test]
fn inactive_region_is_skipped_without_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let seq = chrom_seq();
    let ref_path = write_fasta(dir.path(), "ref", &seq);

    let normal = write_bam(dir.path(), "normal", "normal1", &tiled_specs(&seq, 0, "n"));
    let tumor = write_bam(dir.path(), "tumor", "tumor1", &tiled_specs(&seq, 0, "t"));

    let params = std::sync::Arc::new(builder_params(&ref_path, &normal, &tumor));
    let mut builder = VariantBuilder::new(params).unwrap();

    let window = first_window(&ref_path);
    let calls = builder.process_window(&window).unwrap();

    assert!(calls.is_empty());
    assert_eq!(builder.current_status(), StatusCode::SkippedInactiveRegion);
}

#[test]
fn all_n_reference_window_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let seq = chrom_seq();
    let n_ref = write_fasta(dir.path(), "nref", &"N".repeat(CHROM_LEN));

    let normal = write_bam(dir.path(), "normal", "normal1", &tiled_specs(&seq, 0, "n"));
    let tumor = write_bam(dir.path(), "tumor", "tumor1", &tiled_specs(&seq, 0, "t"));

    let params = std::sync::Arc::new(builder_params(&n_ref, &normal, &tumor));
    let mut builder = VariantBuilder::new(params).unwrap();

    let window = first_window(&n_ref);
    let calls = builder.process_window(&window).unwrap();

    assert!(calls.is_empty());
    assert_eq!(builder.current_status(), StatusCode::SkippedNonlyRefBases);
}

#[test]
fn somatic_snv_is_discovered_from_bam_input() {
    let dir = tempfile::tempdir().unwrap();
    let seq = chrom_seq();
    assert_eq!(seq.as_bytes()[SNV_POS0], b'G');
    let ref_path = write_fasta(dir.path(), "ref", &seq);

    let normal = write_bam(dir.path(), "normal", "normal1", &tiled_specs(&seq, 0, "n"));
    let tumor = write_bam(dir.path(), "tumor", "tumor1", &tiled_specs(&seq, 2, "t"));

    let params = std::sync::Arc::new(builder_params(&ref_path, &normal, &tumor));
    let mut builder = VariantBuilder::new(params).unwrap();

    let window = first_window(&ref_path);
    let calls = builder.process_window(&window).unwrap();

    assert_eq!(builder.current_status(), StatusCode::FoundGenotypedVariant);
    assert_eq!(calls.len(), 1, "expected one somatic SNV");

    let record = calls[0].as_vcf_record();
    let columns: Vec<&str> = record.split('\t').collect();
    assert_eq!(columns[0], "chr1");
    assert_eq!(columns[1], (SNV_POS0 + 1).to_string());
    assert_eq!(columns[3], "G");
    assert_eq!(columns[4], "A");
    assert!(columns[7].contains("TUMOR;TYPE=SNV"));
}

fn run_pipeline(dir: &Path, num_threads: usize, out_name: &str) -> String {
    let seq = chrom_seq();
    let ref_path = write_fasta(dir, &format!("ref_{out_name}"), &seq);
    let normal = write_bam(dir, &format!("normal_{out_name}"), "normal1", &tiled_specs(&seq, 0, "n"));
    let tumor = write_bam(dir, &format!("tumor_{out_name}"), "tumor1", &tiled_specs(&seq, 2, "t"));

    let out_vcfgz = dir.join(format!("{out_name}.vcf.gz"));
    let params = CliParams {
        full_cmd_line: "lancet pipeline (test)".to_string(),
        out_vcfgz: out_vcfgz.clone(),
        bed_file: None,
        in_regions: vec!["chr1".to_string()],
        num_worker_threads: num_threads,
        runtime_stats: Some(dir.join(format!("{out_name}.stats.tsv"))),
        window_builder: WindowBuilderParams::default(),
        variant_builder: builder_params(&ref_path, &normal, &tumor),
    };

    let mut runner = PipelineRunner::new(params);
    runner.run().unwrap();

    let mut decoded = String::new();
    let mut reader = bgzf::Reader::from_path(&out_vcfgz).unwrap();
    reader.read_to_string(&mut decoded).unwrap();
    decoded
}

#[test]
fn pipeline_output_is_deterministic_across_thread_counts() {
    let dir = tempfile::tempdir().unwrap();

    let single = run_pipeline(dir.path(), 1, "single");
    let multi = run_pipeline(dir.path(), 2, "multi");

    let body = |text: &str| -> Vec<String> {
        text.lines()
            .filter(|line| !line.starts_with("##"))
            .map(str::to_string)
            .collect()
    };

    let single_body = body(&single);
    let multi_body = body(&multi);
    assert_eq!(single_body, multi_body);

    // the overlapping windows both see the SNV; the store emits it once
    let records: Vec<&String> = single_body.iter().filter(|line| !line.starts_with('#')).collect();
    assert_eq!(records.len(), 1, "records: {records:?}");
    assert!(records[0].starts_with(&format!("chr1\t{}\t.\tG\tA", SNV_POS0 + 1)));

    // stats file has one line per window
    let stats = std::fs::read_to_string(dir.path().join("single.stats.tsv")).unwrap();
    assert_eq!(stats.lines().count(), 2);
    assert!(stats.contains("FOUND_GENOTYPED_VARIANT"));
}
