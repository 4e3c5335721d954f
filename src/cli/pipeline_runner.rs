use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write as IoWrite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rust_htslib::bam::{self, Read as BamRead};
use rust_htslib::bgzf;
use scoped_threadpool::Pool;

use crate::cli::CliParams;
use crate::core::async_worker::{AsyncWorker, WorkerResult};
use crate::core::read_collector::build_sample_name_list;
use crate::core::variant_builder::StatusCode;
use crate::core::variant_store::VariantStore;
use crate::core::window::Window;
use crate::core::window_builder::{should_exclude_chrom, WindowBuilder};
use crate::hts::alignment::BamExtractor;
use crate::hts::reference::{FastaReference, ReferenceFasta};

// Windows are flushed once every window in a sliding prefix of this many
// is complete, which keeps the output strictly genome ordered
const NUM_BUFFER_WINDOWS: usize = 100;

/**
 * Drives the variant calling pipeline: validates inputs, builds windows,
 * fans them out to worker threads over bounded queues and flushes the
 * variant store in genome order as windows complete.
 */
pub struct PipelineRunner {
    params: CliParams,
}

impl PipelineRunner {
    pub fn new(params: CliParams) -> Self {
        Self { params }
    }

    pub fn run(&mut self) -> Result<()> {
        let pipeline_start = Instant::now();
        let rc_params = &self.params.variant_builder.read_collector;

        let reference = FastaReference::open(&rc_params.ref_path)?;
        self.validate_alignment_inputs(&reference)?;
        self.check_active_region_usable()?;

        let mut output_vcf = bgzf::Writer::from_path(&self.params.out_vcfgz)
            .with_context(|| format!("could not open output VCF file {}", self.params.out_vcfgz.display()))?;
        output_vcf
            .write_all(self.build_vcf_header(&reference)?.as_bytes())
            .context("could not write VCF header")?;

        let windows = self.build_windows(&reference)?;
        let num_total_windows = windows.len();
        info!(
            "Processing {num_total_windows} window(s) with {} VariantBuilder thread(s)",
            self.params.num_worker_threads
        );

        if num_total_windows == 0 {
            output_vcf.flush().context("could not flush output VCF")?;
            return Ok(());
        }

        let mut runtime_stats = match &self.params.runtime_stats {
            Some(path) => {
                let handle = File::create(path)
                    .with_context(|| format!("could not create runtime stats file {}", path.display()))?;
                Some(BufWriter::new(handle))
            }
            None => None,
        };

        let (in_tx, in_rx) = bounded::<Window>(num_total_windows);
        let (out_tx, out_rx) = bounded::<WorkerResult>(num_total_windows);
        for window in &windows {
            in_tx.send(window.clone()).expect("input queue sized to window count");
        }
        drop(in_tx);

        let store = Arc::new(VariantStore::new());
        let stop_token = Arc::new(AtomicBool::new(false));
        let builder_params = Arc::new(self.params.variant_builder.clone());

        let progress = ProgressBar::new(num_total_windows as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec} ETA {eta} {msg}",
            )
            .expect("valid progress template")
            .progress_chars("##-"),
        );

        let mut stats: BTreeMap<StatusCode, u64> = StatusCode::all().into_iter().map(|code| (code, 0)).collect();
        let mut flush_error: Option<anyhow::Error> = None;

        let mut pool = Pool::new(self.params.num_worker_threads as u32);
        pool.scoped(|scope| {
            for _ in 0..self.params.num_worker_threads {
                let worker = AsyncWorker::new(
                    in_rx.clone(),
                    out_tx.clone(),
                    Arc::clone(&store),
                    Arc::clone(&builder_params),
                    Arc::clone(&stop_token),
                );
                scope.execute(move || worker.process());
            }
            drop(out_tx);

            let mut done_windows = vec![false; num_total_windows];
            let mut idx_to_flush = 0usize;
            let mut num_completed = 0usize;

            while num_completed != num_total_windows {
                let result = match out_rx.recv() {
                    Ok(result) => result,
                    Err(_) => break, // all workers gone
                };

                num_completed += 1;
                *stats.entry(result.status).or_insert(0) += 1;
                done_windows[result.genome_index] = true;

                let window = &windows[result.genome_index];
                progress.set_message(format!("{} {}", window.to_samtools_region(), result.status.as_str()));
                progress.inc(1);

                if let Some(stats_out) = runtime_stats.as_mut() {
                    let _ = writeln!(
                        stats_out,
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        window.chrom_name(),
                        window.start_pos1(),
                        window.end_pos1(),
                        result.status.as_str(),
                        result.runtime.as_millis(),
                        result.num_variants
                    );
                }

                // flush the store once a full buffer of leading windows is done
                let check_until = (idx_to_flush + NUM_BUFFER_WINDOWS).min(num_total_windows);
                if idx_to_flush < num_total_windows && done_windows[..check_until].iter().all(|done| *done) {
                    if let Err(err) = store.flush_before_window(&windows[idx_to_flush], &mut output_vcf) {
                        flush_error = Some(err);
                        stop_token.store(true, Ordering::Relaxed);
                        break;
                    }
                    idx_to_flush += 1;
                }
            }

            stop_token.store(true, Ordering::Relaxed);
        });

        progress.finish_and_clear();

        if let Some(err) = flush_error {
            return Err(err.context("failed flushing variants to the output VCF"));
        }

        store.flush_all(&mut output_vcf)?;
        output_vcf.flush().context("could not flush output VCF")?;

        if let Some(stats_out) = runtime_stats.as_mut() {
            stats_out.flush().context("could not flush runtime stats")?;
        }

        Self::log_window_stats(&stats);
        info!(
            "Successfully completed processing {num_total_windows} windows | Runtime={:.2?}",
            pipeline_start.elapsed()
        );

        Ok(())
    }

    fn build_windows(&self, reference: &FastaReference) -> Result<Vec<Window>> {
        let mut window_builder = WindowBuilder::new(reference, self.params.window_builder.clone());
        window_builder.add_batch_regions(&self.params.in_regions)?;

        if let Some(bed_file) = &self.params.bed_file {
            window_builder.add_bed_file(bed_file)?;
        }

        if window_builder.is_empty() {
            warn!("No input regions provided to build windows. Using contigs in reference as input regions");
            window_builder.add_all_reference_regions();
        }

        window_builder.build_windows()
    }

    fn validate_alignment_inputs(&self, reference: &FastaReference) -> Result<()> {
        let rc_params = &self.params.variant_builder.read_collector;
        if rc_params.no_contig_check {
            return Ok(());
        }

        let all_paths = rc_params.normal_paths.iter().chain(rc_params.tumor_paths.iter());
        for path in all_paths {
            let extractor = BamExtractor::open(path, &rc_params.ref_path)?;
            extractor
                .check_contigs_match(reference.list_chroms())
                .with_context(|| format!("contigs in {} do not match the reference", path.display()))?;
        }

        Ok(())
    }

    /// Active region detection needs MD tags; peek the first reads of
    /// every sample and turn the check off when they are absent.
    fn check_active_region_usable(&mut self) -> Result<()> {
        const NUM_READS_TO_PEEK: usize = 1000;

        if self.params.variant_builder.skip_active_region {
            return Ok(());
        }

        let rc_params = &self.params.variant_builder.read_collector;
        let all_paths: Vec<std::path::PathBuf> = rc_params
            .normal_paths
            .iter()
            .chain(rc_params.tumor_paths.iter())
            .cloned()
            .collect();

        for path in &all_paths {
            let mut reader = bam::Reader::from_path(path)
                .with_context(|| format!("could not open alignment file {}", path.display()))?;

            let mut record = bam::Record::new();
            let mut found_md = false;
            for _ in 0..NUM_READS_TO_PEEK {
                match reader.read(&mut record) {
                    Some(Ok(())) => {
                        if record.aux(b"MD").is_ok() {
                            found_md = true;
                            break;
                        }
                    }
                    _ => break,
                }
            }

            if !found_md {
                warn!("MD tag missing in {}. Turning off active region detection", path.display());
                self.params.variant_builder.skip_active_region = true;
                return Ok(());
            }
        }

        Ok(())
    }

    fn build_vcf_header(&self, reference: &FastaReference) -> Result<String> {
        let rc_params = &self.params.variant_builder.read_collector;

        let mut contig_hdr_lines = String::with_capacity(1 << 16);
        for chrom in reference.list_chroms() {
            if should_exclude_chrom(&chrom.name) {
                continue;
            }
            contig_hdr_lines.push_str(&format!("##contig=<ID={},length={}>\n", chrom.name, chrom.length));
        }

        let sample_names = build_sample_name_list(rc_params)?;

        let mut header = String::with_capacity(1 << 16);
        header.push_str("##fileformat=VCFv4.3\n");
        header.push_str(&format!("##fileDate={}\n", current_date_stamp()));
        header.push_str(&format!("##source=Lancet_{}\n", env!("CARGO_PKG_VERSION")));
        header.push_str(&format!("##commandLine=\"{}\"\n", self.params.full_cmd_line));
        header.push_str(&format!("##reference=\"{}\"\n", rc_params.ref_path.display()));
        header.push_str(&contig_hdr_lines);
        header.push_str(
            "##INFO=<ID=SHARED,Number=0,Type=Flag,Description=\"Variant ALT seen in both tumor & normal sample(s)\">\n\
##INFO=<ID=NORMAL,Number=0,Type=Flag,Description=\"Variant ALT seen only in normal samples(s)\">\n\
##INFO=<ID=TUMOR,Number=0,Type=Flag,Description=\"Variant ALT seen only in tumor sample(s)\">\n\
##INFO=<ID=STR,Number=0,Type=Flag,Description=\"Variant ALT seen near an identified STR site\">\n\
##INFO=<ID=TYPE,Number=1,Type=String,Description=\"Variant type. Possible values are SNV, INS, DEL and MNP\">\n\
##INFO=<ID=LENGTH,Number=1,Type=Integer,Description=\"Variant length in base pairs\">\n\
##INFO=<ID=KMERLEN,Number=1,Type=Integer,Description=\"K-mer length used to assemble the locus\">\n\
##INFO=<ID=STR_LEN,Number=1,Type=Integer,Description=\"If variant ALT is near STR, lists length of the STR unit\">\n\
##INFO=<ID=STR_MOTIF,Number=1,Type=String,Description=\"If variant ALT is near STR, lists motif of the STR unit\">\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype called at the variant site\">\n\
##FORMAT=<ID=AD,Number=2,Type=Integer,Description=\"Number of reads supporting REF and ALT alleles\">\n\
##FORMAT=<ID=ADF,Number=2,Type=Integer,Description=\"Number of reads supporting REF and ALT alleles on forward strand\">\n\
##FORMAT=<ID=ADR,Number=2,Type=Integer,Description=\"Number of reads supporting REF and ALT alleles on reverse strand\">\n\
##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Total Read depth in the sample at the variant site\">\n\
##FORMAT=<ID=WDC,Number=1,Type=Float,Description=\"Window read depth after downsampling and read filters\">\n\
##FORMAT=<ID=WTC,Number=1,Type=Float,Description=\"Window read depth before downsampling and read filters\">\n\
##FORMAT=<ID=PRF,Number=1,Type=Float,Description=\"Fraction of reads in the window that pass read quality filters\">\n\
##FORMAT=<ID=VAF,Number=1,Type=Float,Description=\"ALT allele frequency in the sample at the variant site\">\n\
##FORMAT=<ID=RAQS,Number=4,Type=Integer,Description=\"REF allele quality stats - Min, Median, Max, MAD\">\n\
##FORMAT=<ID=AAQS,Number=4,Type=Integer,Description=\"ALT allele quality stats - Min, Median, Max, MAD\">\n\
##FORMAT=<ID=RMQS,Number=4,Type=Integer,Description=\"REF mapping quality stats - Min, Median, Max, MAD\">\n\
##FORMAT=<ID=AMQS,Number=4,Type=Integer,Description=\"ALT mapping quality stats - Min, Median, Max, MAD\">\n\
##FORMAT=<ID=RAPDS,Number=4,Type=Integer,Description=\"REF aln scores pct difference stats - Min, Median, Max, MAD\">\n\
##FORMAT=<ID=AAPDS,Number=4,Type=Integer,Description=\"ALT aln scores pct difference stats - Min, Median, Max, MAD\">\n\
##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Phred-scaled genotype quality for the sample\">\n\
##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Normalized phred-scaled likelihoods for all genotypes\">\n",
        );

        header.push_str(&format!(
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}\n",
            sample_names.join("\t")
        ));

        Ok(header)
    }

    fn log_window_stats(stats: &BTreeMap<StatusCode, u64>) {
        let num_windows: u64 = stats.values().sum();
        if num_windows == 0 {
            return;
        }

        for (status_code, count) in stats {
            let pct_count = (100.0 * *count as f64) / num_windows as f64;
            info!(
                "{:<24} | {pct_count:>8.4}% of total windows | {count} windows",
                status_code.as_str()
            );
        }
    }
}

/// UTC date stamp without pulling in a date-time dependency: civil from
/// days (Howard Hinnant's algorithm).
fn current_date_stamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    let days = (secs / 86_400) as i64 + 719_468;
    let era = days.div_euclid(146_097);
    let doe = days.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    format!("{year:04}{month:02}{day:02}")
}
