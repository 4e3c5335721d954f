pub mod pipeline_runner;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{crate_version, Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;

use crate::caller::variant_call::VariantCallParams;
use crate::cbdg::graph::GraphParams;
use crate::core::read_collector::ReadCollectorParams;
use crate::core::variant_builder::VariantBuilderParams;
use crate::core::window_builder::{
    WindowBuilderParams, MAX_ALLOWED_PCT_OVERLAP, MAX_ALLOWED_REGION_PAD, MAX_ALLOWED_WINDOW_LEN,
    MIN_ALLOWED_PCT_OVERLAP, MIN_ALLOWED_WINDOW_LEN,
};

pub fn build_cli() -> Command {
    Command::new("lancet")
        .version(crate_version!())
        .about("Somatic variant caller via localized micro-assembly of tumor/normal read data")
        .subcommand(pipeline_subcommand())
}

fn pipeline_subcommand() -> Command {
    Command::new("pipeline")
        .about("Run the Lancet variant calling pipeline")
        .arg(
            Arg::new("normal")
                .short('n')
                .long("normal")
                .action(ArgAction::Append)
                .value_name("PATH")
                .required(true)
                .help("Path to one (or) more normal BAM/CRAM file(s)"),
        )
        .arg(
            Arg::new("tumor")
                .short('t')
                .long("tumor")
                .action(ArgAction::Append)
                .value_name("PATH")
                .help("Path to one (or) more tumor BAM/CRAM file(s)"),
        )
        .arg(
            Arg::new("reference")
                .short('r')
                .long("reference")
                .value_name("PATH")
                .required(true)
                .help("Path to the reference FASTA file"),
        )
        .arg(
            Arg::new("out-vcfgz")
                .short('o')
                .long("out-vcfgz")
                .value_name("PATH")
                .required(true)
                .help("Output path to the compressed VCF file"),
        )
        .arg(
            Arg::new("region")
                .short('R')
                .long("region")
                .action(ArgAction::Append)
                .value_name("REF[:START[-END]]")
                .help("One (or) more regions (1-based both inclusive)"),
        )
        .arg(
            Arg::new("bed-file")
                .short('b')
                .long("bed-file")
                .value_name("PATH")
                .help("Path to BED file with regions to process"),
        )
        .arg(
            Arg::new("window-size")
                .short('w')
                .long("window-size")
                .value_name("INT")
                .default_value("1000")
                .value_parser(clap::value_parser!(u64).range(MIN_ALLOWED_WINDOW_LEN..=MAX_ALLOWED_WINDOW_LEN))
                .help("Window size for variant calling tasks"),
        )
        .arg(
            Arg::new("padding")
                .short('P')
                .long("padding")
                .value_name("INT")
                .default_value("500")
                .value_parser(clap::value_parser!(u64).range(0..=MAX_ALLOWED_REGION_PAD))
                .help("Padding for both sides of all input regions"),
        )
        .arg(
            Arg::new("pct-overlap")
                .short('p')
                .long("pct-overlap")
                .value_name("INT")
                .default_value("50")
                .value_parser(clap::value_parser!(u64).range(MIN_ALLOWED_PCT_OVERLAP..=MAX_ALLOWED_PCT_OVERLAP))
                .help("Percent overlap between consecutive windows"),
        )
        .arg(
            Arg::new("num-threads")
                .short('T')
                .long("num-threads")
                .value_name("INT")
                .default_value("2")
                .value_parser(clap::value_parser!(usize))
                .help("Number of async worker threads"),
        )
        .arg(
            Arg::new("min-kmer")
                .short('k')
                .long("min-kmer")
                .value_name("INT")
                .default_value("11")
                .value_parser(clap::value_parser!(usize))
                .help("Min. kmer length to try for graph nodes"),
        )
        .arg(
            Arg::new("max-kmer")
                .short('K')
                .long("max-kmer")
                .value_name("INT")
                .default_value("101")
                .value_parser(clap::value_parser!(usize))
                .help("Max. kmer length to try for graph nodes"),
        )
        .arg(
            Arg::new("min-anchor-cov")
                .long("min-anchor-cov")
                .value_name("INT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32))
                .help("Min. coverage for anchor nodes (source/sink)"),
        )
        .arg(
            Arg::new("min-node-cov")
                .long("min-node-cov")
                .value_name("INT")
                .default_value("2")
                .value_parser(clap::value_parser!(u32))
                .help("Min. coverage for nodes in the graph"),
        )
        .arg(
            Arg::new("max-sample-cov")
                .long("max-sample-cov")
                .value_name("FLOAT")
                .default_value("1000")
                .value_parser(clap::value_parser!(f64))
                .help("Max. per sample coverage before downsampling"),
        )
        .arg(
            Arg::new("min-alt-qual")
                .long("min-alt-qual")
                .value_name("INT")
                .default_value("20")
                .value_parser(clap::value_parser!(u8))
                .help("Min. phred quality supporting ALT allele"),
        )
        .arg(
            Arg::new("min-nml-cov")
                .long("min-nml-cov")
                .value_name("INT")
                .default_value("10")
                .value_parser(clap::value_parser!(u32))
                .help("Min. normal coverage"),
        )
        .arg(
            Arg::new("min-tmr-cov")
                .long("min-tmr-cov")
                .value_name("INT")
                .default_value("4")
                .value_parser(clap::value_parser!(u32))
                .help("Min. tumor coverage"),
        )
        .arg(
            Arg::new("max-nml-vaf")
                .long("max-nml-vaf")
                .value_name("FLOAT")
                .default_value("0.02")
                .value_parser(clap::value_parser!(f64))
                .help("Max. ALT frequency in normal"),
        )
        .arg(
            Arg::new("min-odds-ratio")
                .long("min-odds-ratio")
                .value_name("FLOAT")
                .default_value("0")
                .value_parser(clap::value_parser!(f64))
                .help("Min. VAF odds of tumor vs normal"),
        )
        .arg(
            Arg::new("min-fisher")
                .long("min-fisher")
                .value_name("FLOAT")
                .default_value("5")
                .value_parser(clap::value_parser!(f64))
                .help("Min. phred scaled fisher score"),
        )
        .arg(
            Arg::new("min-str-fisher")
                .long("min-str-fisher")
                .value_name("FLOAT")
                .default_value("10")
                .value_parser(clap::value_parser!(f64))
                .help("Min. phred scaled fisher score for STRs"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Verbose logging, repeat for trace output"),
        )
        .arg(
            Arg::new("extract-pairs")
                .long("extract-pairs")
                .action(ArgAction::SetTrue)
                .help("Extract mates of discordant and split reads from outside the window"),
        )
        .arg(
            Arg::new("no-active-region")
                .long("no-active-region")
                .action(ArgAction::SetTrue)
                .help("Force assembly of all windows, skipping the active region check"),
        )
        .arg(
            Arg::new("no-contig-check")
                .long("no-contig-check")
                .action(ArgAction::SetTrue)
                .help("Skip the contig concordance check between alignments and reference"),
        )
        .arg(
            Arg::new("runtime-stats")
                .long("runtime-stats")
                .value_name("PATH")
                .help("Write per window runtime statistics to a TSV file"),
        )
        .arg(
            Arg::new("graphs-dir")
                .long("graphs-dir")
                .value_name("PATH")
                .help("Write per window assembly graphs and MSAs for debugging"),
        )
}

pub fn set_log_level(matches: &ArgMatches) {
    let level = match matches.get_count("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    let _ = builder.try_init();
}

/// Parsed and validated pipeline options.
#[derive(Debug, Clone)]
pub struct CliParams {
    pub full_cmd_line: String,
    pub out_vcfgz: PathBuf,
    pub bed_file: Option<PathBuf>,
    pub in_regions: Vec<String>,
    pub num_worker_threads: usize,
    pub runtime_stats: Option<PathBuf>,

    pub window_builder: WindowBuilderParams,
    pub variant_builder: VariantBuilderParams,
}

impl CliParams {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let many_paths = |key: &str| -> Vec<PathBuf> {
            matches
                .get_many::<String>(key)
                .map(|vals| vals.map(PathBuf::from).collect())
                .unwrap_or_default()
        };

        let min_kmer = *matches.get_one::<usize>("min-kmer").unwrap();
        let max_kmer = *matches.get_one::<usize>("max-kmer").unwrap();
        if min_kmer % 2 == 0 || max_kmer % 2 == 0 {
            bail!("kmer lengths must be odd, got {min_kmer} and {max_kmer}");
        }
        if !(11..=255).contains(&min_kmer) || !(11..=255).contains(&max_kmer) || min_kmer >= max_kmer {
            bail!("invalid kmer range [{min_kmer}, {max_kmer}]");
        }

        let graph = GraphParams {
            min_kmer_len: min_kmer,
            max_kmer_len: max_kmer,
            min_anchor_cov: *matches.get_one::<u32>("min-anchor-cov").unwrap(),
            min_node_cov: *matches.get_one::<u32>("min-node-cov").unwrap(),
            min_node_cov_ratio: GraphParams::default().min_node_cov_ratio,
            out_graphs_dir: None,
        };

        let read_collector = ReadCollectorParams {
            normal_paths: many_paths("normal"),
            tumor_paths: many_paths("tumor"),
            ref_path: PathBuf::from(matches.get_one::<String>("reference").unwrap()),
            max_window_cov: *matches.get_one::<f64>("max-sample-cov").unwrap(),
            extract_read_pairs: matches.get_flag("extract-pairs"),
            no_filter_reads: false,
            no_contig_check: matches.get_flag("no-contig-check"),
        };

        let variant = VariantCallParams {
            min_nml_cov: *matches.get_one::<u32>("min-nml-cov").unwrap(),
            min_tmr_cov: *matches.get_one::<u32>("min-tmr-cov").unwrap(),
            max_nml_vaf: *matches.get_one::<f64>("max-nml-vaf").unwrap(),
            min_odds_ratio: *matches.get_one::<f64>("min-odds-ratio").unwrap(),
            min_fisher: *matches.get_one::<f64>("min-fisher").unwrap(),
            min_str_fisher: *matches.get_one::<f64>("min-str-fisher").unwrap(),
        };

        let variant_builder = VariantBuilderParams {
            skip_active_region: matches.get_flag("no-active-region"),
            out_graphs_dir: matches.get_one::<String>("graphs-dir").map(PathBuf::from),
            min_alt_quality: *matches.get_one::<u8>("min-alt-qual").unwrap(),
            graph,
            read_collector,
            variant,
        };

        let window_builder = WindowBuilderParams {
            window_length: *matches.get_one::<u64>("window-size").unwrap(),
            region_padding: *matches.get_one::<u64>("padding").unwrap(),
            percent_overlap: *matches.get_one::<u64>("pct-overlap").unwrap(),
        };

        Ok(Self {
            full_cmd_line: std::env::args().collect::<Vec<String>>().join(" "),
            out_vcfgz: PathBuf::from(matches.get_one::<String>("out-vcfgz").unwrap()),
            bed_file: matches.get_one::<String>("bed-file").map(PathBuf::from),
            in_regions: matches
                .get_many::<String>("region")
                .map(|vals| vals.cloned().collect())
                .unwrap_or_default(),
            num_worker_threads: (*matches.get_one::<usize>("num-threads").unwrap()).max(1),
            runtime_stats: matches.get_one::<String>("runtime-stats").map(PathBuf::from),
            window_builder,
            variant_builder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliParams> {
        let matches = build_cli().try_get_matches_from(args).expect("args parse");
        let sub = matches.subcommand_matches("pipeline").expect("pipeline subcommand");
        CliParams::from_matches(sub)
    }

    #[test]
    fn minimal_invocation_uses_defaults() {
        let params = parse(&[
            "lancet", "pipeline", "-n", "n.bam", "-r", "ref.fa", "-o", "out.vcf.gz",
        ])
        .unwrap();

        assert_eq!(params.num_worker_threads, 2);
        assert_eq!(params.window_builder.window_length, 1000);
        assert_eq!(params.variant_builder.graph.min_kmer_len, 11);
        assert_eq!(params.variant_builder.graph.max_kmer_len, 101);
        assert!(params.variant_builder.read_collector.tumor_paths.is_empty());
        assert_eq!(params.variant_builder.variant.min_tmr_cov, 4);
    }

    #[test]
    fn repeatable_options_accumulate() {
        let params = parse(&[
            "lancet", "pipeline", "-n", "n1.bam", "-n", "n2.bam", "-t", "t.bam", "-r", "ref.fa", "-o",
            "out.vcf.gz", "-R", "chr1:1-1000", "-R", "chr2",
        ])
        .unwrap();

        assert_eq!(params.variant_builder.read_collector.normal_paths.len(), 2);
        assert_eq!(params.variant_builder.read_collector.tumor_paths.len(), 1);
        assert_eq!(params.in_regions, vec!["chr1:1-1000", "chr2"]);
    }

    #[test]
    fn even_kmers_are_rejected() {
        let result = parse(&[
            "lancet", "pipeline", "-n", "n.bam", "-r", "ref.fa", "-o", "out.vcf.gz", "-k", "12",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_window_size_is_rejected_by_clap() {
        let result = build_cli().try_get_matches_from([
            "lancet", "pipeline", "-n", "n.bam", "-r", "ref.fa", "-o", "out.vcf.gz", "-w", "100",
        ]);
        assert!(result.is_err());
    }
}
