use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::debug;

use crate::base::sliding_view;
use crate::caller::genotyper::Genotyper;
use crate::caller::msa_builder::MsaBuilder;
use crate::caller::variant_call::{VariantCall, VariantCallParams};
use crate::caller::variant_set::VariantSet;
use crate::cbdg::graph::{Graph, GraphParams};
use crate::core::read_collector::{ReadCollector, ReadCollectorParams};
use crate::core::window::{Region, Window};
use crate::hts::reference::{FastaReference, ReferenceFasta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusCode {
    Unknown,
    SkippedNonlyRefBases,
    SkippedRefRepeatSeen,
    SkippedInactiveRegion,
    SkippedNoasmHaplotype,
    MissingNoMsaVariants,
    FoundGenotypedVariant,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::SkippedNonlyRefBases => "SKIPPED_NONLY_REF_BASES",
            StatusCode::SkippedRefRepeatSeen => "SKIPPED_REF_REPEAT_SEEN",
            StatusCode::SkippedInactiveRegion => "SKIPPED_INACTIVE_REGION",
            StatusCode::SkippedNoasmHaplotype => "SKIPPED_NOASM_HAPLOTYPE",
            StatusCode::MissingNoMsaVariants => "MISSING_NO_MSA_VARIANTS",
            StatusCode::FoundGenotypedVariant => "FOUND_GENOTYPED_VARIANT",
        }
    }

    pub fn all() -> [StatusCode; 7] {
        [
            StatusCode::Unknown,
            StatusCode::SkippedNonlyRefBases,
            StatusCode::SkippedRefRepeatSeen,
            StatusCode::SkippedInactiveRegion,
            StatusCode::SkippedNoasmHaplotype,
            StatusCode::MissingNoMsaVariants,
            StatusCode::FoundGenotypedVariant,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct VariantBuilderParams {
    pub skip_active_region: bool,
    pub out_graphs_dir: Option<PathBuf>,
    pub min_alt_quality: u8,

    pub graph: GraphParams,
    pub read_collector: ReadCollectorParams,
    pub variant: VariantCallParams,
}

impl Default for VariantBuilderParams {
    fn default() -> Self {
        Self {
            skip_active_region: false,
            out_graphs_dir: None,
            min_alt_quality: 20,
            graph: GraphParams::default(),
            read_collector: ReadCollectorParams::default(),
            variant: VariantCallParams::default(),
        }
    }
}

/**
 * Per-window variant discovery engine. Each worker thread owns one
 * builder, so the graph arena, the htslib readers and the aligner state
 * never cross threads.
 */
pub struct VariantBuilder {
    debruijn_graph: Graph,
    read_collector: ReadCollector,
    genotyper: Genotyper,
    reference: FastaReference,
    params: Arc<VariantBuilderParams>,
    current_code: StatusCode,
}

impl VariantBuilder {
    pub fn new(params: Arc<VariantBuilderParams>) -> Result<Self> {
        let mut graph_params = params.graph.clone();
        graph_params.out_graphs_dir = params.out_graphs_dir.clone();

        Ok(Self {
            debruijn_graph: Graph::new(graph_params),
            read_collector: ReadCollector::new(params.read_collector.clone())?,
            genotyper: Genotyper::new(params.min_alt_quality),
            reference: FastaReference::open(&params.read_collector.ref_path)?,
            params,
            current_code: StatusCode::Unknown,
        })
    }

    pub fn current_status(&self) -> StatusCode {
        self.current_code
    }

    pub fn process_window(&mut self, window: &Window) -> Result<Vec<VariantCall>> {
        let reg_str = window.to_samtools_region();
        debug!("Starting to process window {reg_str}");

        let sequence = self
            .reference
            .fetch_seq(window.chrom_name(), window.start_pos1(), window.end_pos1())?;
        let region = Region {
            chrom_index: window.chrom_index(),
            chrom_name: window.chrom_name().to_string(),
            start_pos1: window.start_pos1(),
            end_pos1: window.end_pos1(),
            sequence,
        };

        if region.sequence.bytes().all(|base| base == b'N') {
            debug!("Skipping window {reg_str} since it has only N bases in reference");
            self.current_code = StatusCode::SkippedNonlyRefBases;
            return Ok(Vec::new());
        }

        if crate::base::repeat::has_exact_repeat(&sliding_view(&region.sequence, self.params.graph.max_kmer_len)) {
            debug!(
                "Skipping window {reg_str} since reference has repeat {}-mers",
                self.params.graph.max_kmer_len
            );
            self.current_code = StatusCode::SkippedRefRepeatSeen;
            return Ok(Vec::new());
        }

        if !self.params.skip_active_region && !self.read_collector.is_active_region(&region)? {
            debug!("Skipping window {reg_str} since it has no evidence of mutation in any sample");
            self.current_code = StatusCode::SkippedInactiveRegion;
            return Ok(Vec::new());
        }

        let (reads, samples) = self.read_collector.collect_region(&region)?;
        debug!("Building graph for {reg_str} with {} sample reads", reads.len());

        let groups = self.debruijn_graph.make_haplotypes(&reg_str, &region.sequence, &reads);
        if groups.is_empty() {
            debug!(
                "Could not assemble any haplotypes for window {reg_str} with k={}",
                self.debruijn_graph.current_k()
            );
            self.current_code = StatusCode::SkippedNoasmHaplotype;
            return Ok(Vec::new());
        }

        let klen = self.debruijn_graph.current_k();
        let sample_names = self.read_collector.sample_names();
        let window_id = format!("{}_{}_{}", window.chrom_name(), window.start_pos1(), window.end_pos1());

        let mut variants: Vec<VariantCall> = Vec::new();
        for group in &groups {
            let nalts = group.haplotypes.len() - 1;
            debug!("Building POA based MSA for window {reg_str} with reference and {nalts} haplotypes");

            let msa_builder = MsaBuilder::new(
                &group.haplotypes,
                self.params.out_graphs_dir.as_deref(),
                &window_id,
            );

            let base_pos1 = window.start_pos1() as usize + group.anchor_start_idx;
            let vset = VariantSet::new(&msa_builder, window.chrom_index(), window.chrom_name(), base_pos1);
            if vset.is_empty() {
                debug!("No variants found for window {reg_str} from MSA of reference and {nalts} haplotypes");
                continue;
            }

            let num_vars = vset.count();
            debug!("Found {num_vars} variant(s) for window {reg_str} from MSA of reference and {nalts} haplotypes");

            let oriented_haps = msa_builder.haplotypes();
            for (var, evidence) in self.genotyper.genotype(oriented_haps, &reads, &vset, &sample_names) {
                variants.push(VariantCall::new(&var, &evidence, &samples, &self.params.variant, klen));
            }
        }

        if variants.is_empty() {
            self.current_code = StatusCode::MissingNoMsaVariants;
            return Ok(Vec::new());
        }

        debug!(
            "Genotyped {} variant(s) for window {reg_str} by re-aligning sample reads",
            variants.len()
        );
        self.current_code = StatusCode::FoundGenotypedVariant;
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_render_their_wire_names() {
        assert_eq!(StatusCode::Unknown.as_str(), "UNKNOWN");
        assert_eq!(StatusCode::SkippedInactiveRegion.as_str(), "SKIPPED_INACTIVE_REGION");
        assert_eq!(StatusCode::FoundGenotypedVariant.as_str(), "FOUND_GENOTYPED_VARIANT");
        assert_eq!(StatusCode::all().len(), 7);
    }
}
