use std::collections::VecDeque;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write as IoWrite};
use std::path::PathBuf;

use fxhash::{FxHashMap, FxHashSet};
use log::trace;
use rayon::prelude::*;

use crate::base::repeat::{has_approximate_repeat, has_exact_repeat};
use crate::base::sliding_view;
use crate::cbdg::edge::{make_fwd_edge_kind, Edge};
use crate::cbdg::kmer::{Kmer, SeqOrder};
use crate::cbdg::max_flow::MaxFlow;
use crate::cbdg::node::Node;
use crate::cbdg::read::Read;
use crate::cbdg::Label;

pub type NodeId = u64;
pub type NodeTable = FxHashMap<NodeId, Node>;

pub const DEFAULT_GRAPH_TRAVERSAL_LIMIT: usize = 1_000_000;

const DEFAULT_MIN_ANCHOR_LENGTH: usize = 150;
const DEFAULT_PCT_NODES_NEEDED: f64 = 10.0;
const NUM_ALLOWED_MISMATCHES: usize = 3;
const MIN_KMER_BASE_QUALITY: u8 = 20;

#[derive(Debug, Clone)]
pub struct GraphParams {
    pub min_kmer_len: usize,
    pub max_kmer_len: usize,
    pub min_anchor_cov: u32,
    pub min_node_cov: u32,
    pub min_node_cov_ratio: f64,
    pub out_graphs_dir: Option<PathBuf>,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            min_kmer_len: 11,
            max_kmer_len: 101,
            min_anchor_cov: 5,
            min_node_cov: 2,
            min_node_cov_ratio: 0.02,
            out_graphs_dir: None,
        }
    }
}

/// Assembled haplotypes for one connected component. The first haplotype is
/// always the reference anchor sequence; `anchor_start_idx` is its 0-based
/// offset into the window reference.
#[derive(Debug, Clone)]
pub struct HaplotypeGroup {
    pub haplotypes: Vec<String>,
    pub anchor_start_idx: usize,
}

#[derive(Debug, Clone, Copy)]
struct RefAnchor {
    anchor_id: NodeId,
    ref_offset: usize,
    found_anchor: bool,
}

#[derive(Debug, Clone, Copy)]
struct ComponentInfo {
    comp_id: usize,
    num_nodes: usize,
    pct_nodes: f64,
}

/**
 * Colored, compacted, bidirected de Bruijn graph over one window.
 *
 * Nodes are canonical k-mers keyed by their 64-bit sequence hash; edges are
 * bidirected with a mirror stored at each endpoint. The graph is rebuilt
 * from scratch for every k tried in `make_haplotypes`.
 * https://github.com/GATB/bcalm/blob/v2.2.3/bidirected-graphs-in-bcalm2/bidirected-graphs-in-bcalm2.md
 */
pub struct Graph {
    params: GraphParams,
    nodes: NodeTable,
    ref_node_ids: Vec<NodeId>,
    source_and_sink: (NodeId, NodeId),
    average_cov: f64,
    curr_k: usize,
}

impl Graph {
    pub fn new(params: GraphParams) -> Self {
        Self {
            params,
            nodes: NodeTable::default(),
            ref_node_ids: Vec::new(),
            source_and_sink: (0, 0),
            average_cov: 0.0,
            curr_k: 0,
        }
    }

    pub fn current_k(&self) -> usize {
        self.curr_k
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    /// Reference k-mer node ids in window order for the current k.
    pub fn ref_node_ids(&self) -> &[NodeId] {
        &self.ref_node_ids
    }

    #[cfg(test)]
    pub(crate) fn build_for_tests(ref_seq: &str, reads: &[Read], currk: usize) -> Graph {
        let mut graph = Graph::new(GraphParams::default());
        graph.curr_k = currk;
        let mut mate_mers = FxHashSet::default();
        graph.build_graph(ref_seq, reads, &mut mate_mers);
        graph
    }

    /// Assemble candidate haplotypes for the window. Tries increasing odd k
    /// until the reference is repeat free and the pruned graph is acyclic,
    /// then walks unique source to sink paths per connected component.
    pub fn make_haplotypes(&mut self, reg_str: &str, ref_seq: &str, reads: &[Read]) -> Vec<HaplotypeGroup> {
        let mut groups: Vec<HaplotypeGroup> = Vec::new();
        let mut mate_mers: FxHashSet<(String, NodeId)> = FxHashSet::default();

        self.curr_k = self.params.min_kmer_len.saturating_sub(2);

        'increment_k: while groups.is_empty() && self.curr_k < self.params.max_kmer_len {
            self.curr_k += 2;
            self.average_cov = 0.0;
            self.source_and_sink = (0, 0);

            if has_exact_or_approx_repeat(ref_seq, self.curr_k) {
                continue 'increment_k;
            }

            self.build_graph(ref_seq, reads, &mut mate_mers);
            trace!(
                "Built graph for {} with k={}, nodes={}, reads={}",
                reg_str,
                self.curr_k,
                self.nodes.len(),
                reads.len()
            );

            self.remove_low_cov_nodes(0);
            let components = self.mark_connected_components();
            trace!(
                "Found {} connected components in graph for {} with k={}",
                components.len(),
                reg_str,
                self.curr_k
            );

            for cinfo in &components {
                if cinfo.pct_nodes < DEFAULT_PCT_NODES_NEEDED {
                    continue;
                }

                let comp_id = cinfo.comp_id;
                let source = self.find_source(comp_id);
                let sink = self.find_sink(comp_id);

                if !source.found_anchor || !sink.found_anchor || source.anchor_id == sink.anchor_id {
                    trace!(
                        "Skipping comp{} in graph for {} because source and sink were not found",
                        comp_id,
                        reg_str
                    );
                    continue;
                }

                if sink.ref_offset < source.ref_offset {
                    continue;
                }

                let anchor_length = sink.ref_offset - source.ref_offset + self.curr_k;
                if anchor_length < DEFAULT_MIN_ANCHOR_LENGTH {
                    continue;
                }

                trace!(
                    "Found {}bp anchor for {} comp={} with k={}",
                    anchor_length,
                    reg_str,
                    comp_id,
                    self.curr_k
                );

                self.source_and_sink = (source.anchor_id, sink.anchor_id);
                let ref_anchor_seq = &ref_seq[source.ref_offset..source.ref_offset + anchor_length];

                if self.has_cycle() {
                    trace!("Graph cycle found for {} comp={} with k={}", reg_str, comp_id, self.curr_k);
                    continue 'increment_k;
                }

                self.compress_graph(comp_id, reg_str);
                self.remove_low_cov_nodes(comp_id);
                self.compress_graph(comp_id, reg_str);
                self.remove_tips(comp_id, reg_str);

                if self.has_cycle() {
                    trace!("Graph cycle found for {} comp={} with k={}", reg_str, comp_id, self.curr_k);
                    continue 'increment_k;
                }

                self.write_dot(reg_str, comp_id);

                let mut haplotypes: Vec<String> = Vec::new();
                let mut max_flow = MaxFlow::new(&self.nodes, self.source_and_sink, self.curr_k);
                while let Some(path_seq) = max_flow.next_path() {
                    trace!(
                        "Assembled {}bp path sequence for {} with k={}",
                        path_seq.len(),
                        reg_str,
                        self.curr_k
                    );
                    haplotypes.push(path_seq);
                }

                if !haplotypes.is_empty() {
                    haplotypes.sort_unstable();
                    haplotypes.dedup();

                    // A repeated k-mer inside an assembled haplotype means
                    // this k cannot resolve the locus unambiguously
                    let hap_has_repeat = haplotypes
                        .iter()
                        .any(|hap| has_exact_repeat(&sliding_view(hap, self.curr_k)));
                    if hap_has_repeat {
                        trace!("Haplotype repeat found for {} with k={}", reg_str, self.curr_k);
                        continue 'increment_k;
                    }

                    haplotypes.insert(0, ref_anchor_seq.to_string());
                    groups.push(HaplotypeGroup {
                        haplotypes,
                        anchor_start_idx: source.ref_offset,
                    });
                }
            }
        }

        let num_asm_haps: usize = groups.iter().map(|grp| grp.haplotypes.len() - 1).sum();
        trace!(
            "Assembled {} haplotypes for {} with k={}",
            num_asm_haps,
            reg_str,
            self.curr_k
        );

        groups
    }

    fn build_graph(&mut self, ref_seq: &str, reads: &[Read], mate_mers: &mut FxHashSet<(String, NodeId)>) {
        let currk = self.curr_k;
        let mut nsample_bases = 0usize;
        let mut max_num_kmers = ref_seq.len().saturating_sub(currk) + 1;

        let mut seqs: Vec<(&str, Label)> = Vec::with_capacity(reads.len() + 1);
        seqs.push((ref_seq, Label::Reference));
        for read in reads {
            nsample_bases += read.length();
            max_num_kmers += read.length().saturating_sub(currk) + 1;
            seqs.push((&read.sequence, read.tag));
        }

        self.average_cov = nsample_bases as f64 / ref_seq.len() as f64;
        let added_nodes = self.add_to_graph(&seqs, max_num_kmers);

        self.ref_node_ids.clear();
        self.ref_node_ids.extend_from_slice(&added_nodes[0]);

        mate_mers.clear();

        for (rd_idx, read) in reads.iter().enumerate() {
            let mm_label = read.mate_mer_label();
            let qual_windows: Vec<&[u8]> = read.quals.windows(currk).collect();

            for (kmer_idx, node_id) in added_nodes[rd_idx + 1].iter().enumerate() {
                let low_qual = qual_windows[kmer_idx]
                    .iter()
                    .any(|&base_qual| base_qual < MIN_KMER_BASE_QUALITY);
                if low_qual {
                    continue;
                }

                let mm_pair = (mm_label.clone(), *node_id);
                if mate_mers.contains(&mm_pair) {
                    continue;
                }

                if let Some(node) = self.nodes.get_mut(node_id) {
                    node.increment_read_support(read.tag);
                }
                mate_mers.insert(mm_pair);
            }
        }
    }

    fn add_to_graph(&mut self, seqs: &[(&str, Label)], max_kmers: usize) -> Vec<Vec<NodeId>> {
        self.nodes.clear();
        self.nodes.reserve(max_kmers);

        let currk = self.curr_k;
        let mut results: Vec<Vec<NodeId>> = Vec::with_capacity(seqs.len());

        for (seq, label) in seqs {
            let kplus_ones = sliding_view(seq, currk + 1);
            let mut seq_nodes: Vec<NodeId> = Vec::with_capacity(kplus_ones.len() + 1);

            for (mer_idx, mer) in kplus_ones.iter().enumerate() {
                let seq1 = &mer[..currk];
                let seq2 = &mer[1..];

                let first = Kmer::new(seq1);
                let second = Kmer::new(seq2);
                let left_id = first.identifier();
                let right_id = second.identifier();

                // The edge kind records the strand each k-mer presents in
                // this occurrence: PLUS when the occurrence is canonical
                let fwd_kind = make_fwd_edge_kind(
                    first.sign_for(SeqOrder::Default),
                    second.sign_for(SeqOrder::Default),
                );
                let fwd_edge = Edge::new(left_id, right_id, fwd_kind);

                self.nodes.entry(left_id).or_insert_with(|| Node::new(seq1, *label));
                self.nodes.entry(right_id).or_insert_with(|| Node::new(seq2, *label));

                if mer_idx == 0 {
                    seq_nodes.push(left_id);
                }

                let first_node = self.nodes.get_mut(&left_id).expect("left node just inserted");
                first_node.add_label(*label);
                first_node.emplace_edge(fwd_edge);

                let second_node = self.nodes.get_mut(&right_id).expect("right node just inserted");
                second_node.add_label(*label);
                second_node.emplace_edge(fwd_edge.mirror_edge());

                seq_nodes.push(right_id);
            }

            results.push(seq_nodes);
        }

        results
    }

    fn remove_low_cov_nodes(&mut self, component_id: usize) {
        // min_node_cov -> minimum coverage required for each node
        // min_ratio_cov -> combined sample coverage scaled by the ratio knob
        let min_ratio_cov = (self.params.min_node_cov_ratio * self.average_cov).floor() as u32;
        let min_req_cov = self.params.min_node_cov.max(min_ratio_cov);
        let (source_id, sink_id) = self.source_and_sink;

        let mut nodes_to_remove: Vec<NodeId> = self
            .nodes
            .iter()
            .filter_map(|(nid, node)| {
                if node.component_id() != component_id || *nid == source_id || *nid == sink_id {
                    return None;
                }

                let is_nml_singleton = node.normal_read_support() == 1;
                let is_tmr_singleton = node.tumor_read_support() == 1;
                let total_sample_cov = node.total_read_support();

                if (is_nml_singleton && is_tmr_singleton) || total_sample_cov < min_req_cov {
                    Some(*nid)
                } else {
                    None
                }
            })
            .collect();

        if !nodes_to_remove.is_empty() {
            trace!(
                "Removing {} low coverage nodes in comp{} with k={}",
                nodes_to_remove.len(),
                component_id,
                self.curr_k
            );
            nodes_to_remove.sort_unstable();
            self.remove_nodes(&nodes_to_remove);
        }
    }

    fn remove_node(&mut self, nid: NodeId) {
        let removed = match self.nodes.remove(&nid) {
            Some(node) => node,
            None => return,
        };

        // drop the incoming mirrors of the removed node's edges
        for conn in removed.edges() {
            if conn.is_self_loop() {
                continue;
            }
            if let Some(nbour) = self.nodes.get_mut(&conn.dst_id()) {
                nbour.erase_edge(&conn.mirror_edge());
            }
        }
    }

    fn remove_nodes(&mut self, node_ids: &[NodeId]) {
        for nid in node_ids {
            self.remove_node(*nid);
        }
    }

    fn mark_connected_components(&mut self) -> Vec<ComponentInfo> {
        let mut current_component = 0usize;
        let mut results_info: Vec<ComponentInfo> = Vec::new();

        debug_assert!(self.nodes.values().all(|node| node.component_id() == 0));

        let mut sorted_ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        sorted_ids.sort_unstable();

        for seed_id in sorted_ids {
            if self.nodes[&seed_id].component_id() != 0 {
                continue;
            }

            current_component += 1;
            results_info.push(ComponentInfo {
                comp_id: current_component,
                num_nodes: 0,
                pct_nodes: 0.0,
            });

            let mut connected_nodes: VecDeque<NodeId> = VecDeque::new();
            connected_nodes.push_back(seed_id);

            while let Some(current_id) = connected_nodes.pop_front() {
                let current_node = self.nodes.get_mut(&current_id).expect("component node exists");
                if current_node.component_id() != 0 {
                    continue;
                }

                current_node.set_component_id(current_component);
                results_info[current_component - 1].num_nodes += 1;
                let neighbours: Vec<NodeId> =
                    self.nodes[&current_id].edges().iter().map(Edge::dst_id).collect();
                connected_nodes.extend(neighbours);
            }
        }

        let total_num_nodes = self.nodes.len() as f64;
        for cinfo in &mut results_info {
            cinfo.pct_nodes = 100.0 * (cinfo.num_nodes as f64 / total_num_nodes);
        }

        results_info.sort_by(|lhs, rhs| rhs.num_nodes.cmp(&lhs.num_nodes).then(lhs.comp_id.cmp(&rhs.comp_id)));

        debug_assert!(self.nodes.values().all(|node| node.component_id() != 0));
        results_info
    }

    fn find_source(&self, component_id: usize) -> RefAnchor {
        self.find_anchor(component_id, false)
    }

    fn find_sink(&self, component_id: usize) -> RefAnchor {
        self.find_anchor(component_id, true)
    }

    fn find_anchor(&self, component_id: usize, reverse_scan: bool) -> RefAnchor {
        let mut result = RefAnchor {
            anchor_id: 0,
            ref_offset: 0,
            found_anchor: false,
        };

        let indices: Vec<usize> = if reverse_scan {
            (0..self.ref_node_ids.len()).rev().collect()
        } else {
            (0..self.ref_node_ids.len()).collect()
        };

        for ref_idx in indices {
            let nid = self.ref_node_ids[ref_idx];
            let node = match self.nodes.get(&nid) {
                Some(node) => node,
                None => continue,
            };

            if node.component_id() != component_id || node.total_read_support() < self.params.min_anchor_cov {
                continue;
            }

            result.anchor_id = nid;
            result.ref_offset = ref_idx;
            result.found_anchor = true;
            break;
        }

        result
    }

    fn has_cycle(&self) -> bool {
        let (source_id, _) = self.source_and_sink;
        let source = match self.nodes.get(&source_id) {
            Some(node) => node,
            None => return false,
        };

        let mut traversed: FxHashSet<NodeId> = FxHashSet::default();
        traversed.reserve(self.nodes.len());

        let mut recursion_depth = 0usize;
        let max_recursion_limit = self.nodes.len() * self.nodes.len();
        self.cycle_dfs(source, &mut traversed, &mut recursion_depth, max_recursion_limit)
    }

    // DFS from source following the node's first-seen orientation. The
    // visited set is scoped to the current walk stem: a node is erased when
    // the walk unwinds past it, and a cycle-positive return leaves the set
    // untouched. Exceeding the recursion limit counts as a cycle.
    fn cycle_dfs(
        &self,
        node: &Node,
        traversed: &mut FxHashSet<NodeId>,
        recursion_depth: &mut usize,
        max_recursion_limit: usize,
    ) -> bool {
        let node_default_sign = node.sign_for(SeqOrder::Default);
        traversed.insert(node.identifier());

        if *recursion_depth > max_recursion_limit {
            return true;
        }

        for conn in node.edges() {
            if conn.src_sign() != node_default_sign {
                continue;
            }

            if traversed.contains(&conn.dst_id()) {
                return true;
            }

            let neighbour = self.nodes.get(&conn.dst_id()).expect("edge mirror invariant");
            *recursion_depth += 1;
            if self.cycle_dfs(neighbour, traversed, recursion_depth, max_recursion_limit) {
                return true;
            }
        }

        traversed.remove(&node.identifier());
        false
    }

    fn compress_graph(&mut self, component_id: usize, reg_str: &str) {
        let mut remove_nids: FxHashSet<NodeId> = FxHashSet::default();
        remove_nids.reserve(self.nodes.len());

        let mut sorted_ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        sorted_ids.sort_unstable();

        for nid in sorted_ids {
            if remove_nids.contains(&nid) {
                continue;
            }
            match self.nodes.get(&nid) {
                Some(node) if node.component_id() == component_id => {}
                _ => continue,
            }

            self.compress_node(nid, SeqOrder::Default, &mut remove_nids);
            self.compress_node(nid, SeqOrder::Opposite, &mut remove_nids);
        }

        if !remove_nids.is_empty() {
            trace!(
                "Compressed {} nodes for {} in comp{} with k={}",
                remove_nids.len(),
                reg_str,
                component_id,
                self.curr_k
            );
            let mut removable: Vec<NodeId> = remove_nids.into_iter().collect();
            removable.sort_unstable();
            self.remove_nodes(&removable);
        }
    }

    fn compress_node(&mut self, nid: NodeId, ord: SeqOrder, compressed_ids: &mut FxHashSet<NodeId>) {
        while let Some(src2obdy) = self.find_compressible_edge(nid, ord) {
            debug_assert_eq!(src2obdy.src_id(), nid);
            let obdy_id = src2obdy.dst_id();
            let obdy = self.nodes.get(&obdy_id).expect("buddy node exists").clone();

            {
                let src = self.nodes.get_mut(&nid).expect("src node exists");
                src.merge(&obdy, src2obdy.kind(), self.curr_k);
                src.erase_edge(&src2obdy); // src -->X--> old_buddy
            }

            let rev_src2obdy_src_sign = src2obdy.src_sign().rev();
            for obdy2nbdy in obdy.edges() {
                // Skip the old_buddy --> src edge before rewiring the rest
                if *obdy2nbdy == src2obdy.mirror_edge() {
                    continue;
                }

                debug_assert!(!obdy2nbdy.is_self_loop());
                debug_assert_ne!(obdy2nbdy.dst_id(), nid);

                // src --> old_buddy --> new_buddy becomes src --> new_buddy
                let ne_src_sign = if src2obdy.dst_sign() != obdy2nbdy.src_sign() {
                    rev_src2obdy_src_sign
                } else {
                    src2obdy.src_sign()
                };
                let src2nbdy = Edge::new(
                    nid,
                    obdy2nbdy.dst_id(),
                    make_fwd_edge_kind(ne_src_sign, obdy2nbdy.dst_sign()),
                );

                self.nodes
                    .get_mut(&nid)
                    .expect("src node exists")
                    .emplace_edge(src2nbdy);

                let nbdy = self.nodes.get_mut(&obdy2nbdy.dst_id()).expect("new buddy exists");
                nbdy.emplace_edge(src2nbdy.mirror_edge());
                nbdy.erase_edge(&obdy2nbdy.mirror_edge());
            }

            compressed_ids.insert(obdy_id);
        }
    }

    fn find_compressible_edge(&self, nid: NodeId, ord: SeqOrder) -> Option<Edge> {
        // In order for src to be compressible with its buddy, src must have
        // 1-2 outgoing edges, no self loop, exactly one edge in direction
        // `ord` not landing on an anchor, and the symmetric conditions must
        // hold at the buddy end.
        let src = &self.nodes[&nid];

        if src.num_out_edges() > 2 || src.num_out_edges() == 0 || src.has_self_loop() {
            return None;
        }

        let mergeable_edges = src.find_edges_in_direction(ord);
        if mergeable_edges.len() != 1 {
            return None;
        }

        let potential_result_edge = mergeable_edges[0];
        let (source_id, sink_id) = self.source_and_sink;
        if potential_result_edge.dst_id() == source_id || potential_result_edge.dst_id() == sink_id {
            return None;
        }

        if !self.is_potential_buddy_edge(src, &potential_result_edge) {
            return None;
        }

        let opp_dir_edges = src.find_edges_in_direction(ord.rev());
        if opp_dir_edges.is_empty() {
            return Some(potential_result_edge);
        }
        if opp_dir_edges.len() > 1 {
            return None;
        }

        if !self.is_potential_buddy_edge(src, &opp_dir_edges[0]) {
            return None;
        }

        Some(potential_result_edge)
    }

    fn is_potential_buddy_edge(&self, src: &Node, conn: &Edge) -> bool {
        let nbour = match self.nodes.get(&conn.dst_id()) {
            Some(node) => node,
            None => return false,
        };

        // Edge case where the only nodes between src and nbour are each other
        if src.num_out_edges() == 1 && nbour.num_out_edges() == 1 {
            let edge_from_src = src.edges()[0];
            let edge_from_nbour = nbour.edges()[0];
            if edge_from_src.dst_id() == nbour.identifier() && edge_from_nbour.dst_id() == src.identifier() {
                return false;
            }
        }

        if nbour.num_out_edges() > 2 || nbour.num_out_edges() == 0 || nbour.has_self_loop() {
            return false;
        }

        let expected_nbour2src = conn.mirror_edge();
        let start_sign_nbour2src = expected_nbour2src.src_sign();
        let dir_nbour2src = if start_sign_nbour2src == nbour.sign_for(SeqOrder::Default) {
            SeqOrder::Default
        } else {
            SeqOrder::Opposite
        };

        let nb_edges_in_nbour2src_dir = nbour.find_edges_in_direction(dir_nbour2src);
        if nb_edges_in_nbour2src_dir.len() != 1 || nb_edges_in_nbour2src_dir[0] != expected_nbour2src {
            return false;
        }

        let nb_edges_in_opp_dir = nbour.find_edges_in_direction(dir_nbour2src.rev());
        // Reject when nbour loops straight back to src in the opposite direction
        if nb_edges_in_opp_dir.len() != 1 || nb_edges_in_opp_dir[0].dst_id() == conn.src_id() {
            return false;
        }

        match self.nodes.get(&nb_edges_in_opp_dir[0].dst_id()) {
            Some(nnb) => nnb.num_out_edges() <= 2,
            None => false,
        }
    }

    fn remove_tips(&mut self, component_id: usize, reg_str: &str) {
        let mut total_tips = 0usize;

        // Compression after tip removal can expose new tips, so repeat
        // until the graph is tip free
        loop {
            let (source_id, sink_id) = self.source_and_sink;
            let currk = self.curr_k;

            let mut nids_to_remove: Vec<NodeId> = self
                .nodes
                .iter()
                .filter_map(|(nid, node)| {
                    if node.component_id() != component_id || node.num_out_edges() > 1 {
                        return None;
                    }
                    if *nid == source_id || *nid == sink_id {
                        return None;
                    }

                    let uniq_seq_len = node.seq_length() - currk + 1;
                    if uniq_seq_len >= currk {
                        return None;
                    }

                    Some(*nid)
                })
                .collect();

            if nids_to_remove.is_empty() {
                break;
            }

            nids_to_remove.sort_unstable();
            total_tips += nids_to_remove.len();
            self.remove_nodes(&nids_to_remove);
            self.compress_graph(component_id, reg_str);
        }

        if total_tips > 0 {
            trace!(
                "Removed {} tips for {} in comp{} with k={}",
                total_tips,
                reg_str,
                component_id,
                self.curr_k
            );
        }
    }

    /// Every outgoing edge must have its mirror stored at the destination.
    /// Checked by tests after build and after each compress/prune pass.
    pub fn edge_mirror_invariant_holds(&self) -> bool {
        self.nodes.values().all(|node| {
            node.edges().iter().all(|conn| match self.nodes.get(&conn.dst_id()) {
                Some(dst) => dst.edges().contains(&conn.mirror_edge()),
                None => false,
            })
        })
    }

    fn write_dot(&self, reg_str: &str, comp_id: usize) {
        let out_dir = match &self.params.out_graphs_dir {
            Some(dir) => dir.join("dbg_graph"),
            None => return,
        };

        let win_id: String = reg_str
            .chars()
            .map(|ch| if ch == ':' || ch == '-' { '_' } else { ch })
            .collect();
        let fname = format!("dbg__{}__k{}__comp{}.dot", win_id, self.curr_k, comp_id);

        if create_dir_all(&out_dir).is_err() {
            return;
        }

        let handle = match File::create(out_dir.join(fname)) {
            Ok(fhandle) => fhandle,
            Err(_) => return,
        };
        let mut out = BufWriter::new(handle);

        let _ = writeln!(out, "strict digraph G {{");
        let (source_id, sink_id) = self.source_and_sink;

        let mut sorted_ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        sorted_ids.sort_unstable();

        for nid in sorted_ids {
            let node = &self.nodes[&nid];
            if node.component_id() != comp_id {
                continue;
            }

            let fill_color = if nid == source_id || nid == sink_id {
                "orchid"
            } else if node.is_shared() {
                "steelblue"
            } else if node.is_tumor_only() {
                "indianred"
            } else if node.is_normal_only() {
                "mediumseagreen"
            } else {
                "lightblue"
            };

            let _ = writeln!(
                out,
                "{} [shape=circle fillcolor={} label=\"{}\\nlength={}\\ncoverage={}\"]",
                nid,
                fill_color,
                node.seq_for(SeqOrder::Default),
                node.seq_length(),
                node.total_read_support()
            );

            for conn in node.edges() {
                let src_sign = if conn.src_sign() == crate::cbdg::Sign::Plus { '+' } else { '-' };
                let dst_sign = if conn.dst_sign() == crate::cbdg::Sign::Plus { '+' } else { '-' };
                let _ = writeln!(
                    out,
                    "{} -> {} [taillabel=\"{}\" headlabel=\"{}\"]",
                    conn.src_id(),
                    conn.dst_id(),
                    src_sign,
                    dst_sign
                );
            }
        }

        let _ = writeln!(out, "}}");
    }
}

pub fn has_exact_or_approx_repeat(seq: &str, window: usize) -> bool {
    let klen_seqs = sliding_view(seq, window);
    has_exact_repeat(&klen_seqs) || has_par_approximate_repeat(&klen_seqs)
}

fn has_par_approximate_repeat(kmers: &[&str]) -> bool {
    if kmers.len() < 256 {
        return has_approximate_repeat(kmers, NUM_ALLOWED_MISMATCHES);
    }

    kmers.par_iter().enumerate().any(|(first_idx, first_kmer)| {
        kmers[first_idx + 1..]
            .iter()
            .any(|second_kmer| crate::base::repeat::hamming_dist_word64(first_kmer, second_kmer) <= NUM_ALLOWED_MISMATCHES)
    })
}
