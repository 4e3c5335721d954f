use std::collections::VecDeque;

use fxhash::FxHashSet;

use crate::cbdg::edge::Edge;
use crate::cbdg::graph::{NodeId, NodeTable, DEFAULT_GRAPH_TRAVERSAL_LIMIT};
use crate::cbdg::kmer::{SeqOrder, Sign};
use crate::cbdg::node::Node;

type Walk = Vec<Edge>;

const ESTIMATED_WALK_LENGTH: usize = 128;

/**
 * BFS haplotype path enumerator over the pruned graph.
 *
 * Each call to `next_path` returns a source to sink walk touching at least
 * one edge no earlier walk used, translated to its DNA sequence. Candidate
 * walks are extended breadth first with unseen edges prioritized, and edge
 * expansion is fully ordered so traversal is deterministic.
 */
pub struct MaxFlow<'a> {
    graph: &'a NodeTable,
    source_id: NodeId,
    sink_id: NodeId,
    current_k: usize,
    traversed: FxHashSet<Edge>,
}

impl<'a> MaxFlow<'a> {
    pub fn new(graph: &'a NodeTable, src_and_snk: (NodeId, NodeId), currk: usize) -> Self {
        let (source_id, sink_id) = src_and_snk;
        Self {
            graph,
            source_id,
            sink_id,
            current_k: currk,
            traversed: FxHashSet::default(),
        }
    }

    pub fn next_path(&mut self) -> Option<String> {
        let walk = self.build_next_walk()?;
        if walk.is_empty() {
            return None;
        }
        self.build_sequence(&walk)
    }

    fn build_next_walk(&mut self) -> Option<Walk> {
        let mut nvisits = 0usize;
        let mut best_possible_walk: Option<Walk> = None;
        let mut candidates: VecDeque<(Walk, u64)> = VecDeque::new();

        let source = self.graph.get(&self.source_id)?;
        let dflt_src_sign = source.sign_for(SeqOrder::Default);

        // Seed one candidate walk per outgoing source edge
        for conn in self.walkable_edges_in_direction(source, dflt_src_sign) {
            let mut seed_walk = Walk::with_capacity(ESTIMATED_WALK_LENGTH);
            seed_walk.push(conn);
            let seed_score = u64::from(!self.traversed.contains(&conn));
            candidates.push_back((seed_walk, seed_score));
        }

        while let Some((current_walk, current_score)) = candidates.pop_front() {
            nvisits += 1;
            if nvisits > DEFAULT_GRAPH_TRAVERSAL_LIMIT {
                break;
            }

            let last_edge = *current_walk.last().expect("walks are never empty");
            let leaf_node = self
                .graph
                .get(&last_edge.dst_id())
                .expect("edge mirror invariant");

            // Touching sink with at least one unique edge ends the search;
            // touching it without one discards the walk
            if leaf_node.identifier() == self.sink_id {
                if current_score > 0 {
                    best_possible_walk = Some(current_walk);
                    break;
                }
                continue;
            }

            let walk_direction = last_edge.dst_sign();
            for conn in self.walkable_edges_in_direction(leaf_node, walk_direction) {
                let mut extension = current_walk.clone();
                extension.push(conn);
                let extension_score = if self.traversed.contains(&conn) {
                    current_score
                } else {
                    current_score + 1
                };
                candidates.push_back((extension, extension_score));
            }
        }

        let best_possible_walk = best_possible_walk?;
        self.traversed.extend(best_possible_walk.iter().copied());
        Some(best_possible_walk)
    }

    fn build_sequence(&self, walk: &[Edge]) -> Option<String> {
        debug_assert!(!walk.is_empty());

        let mut uniq_seqs: Vec<String> = Vec::with_capacity(walk.len() + 1);
        let mut ordering = if walk[0].src_sign() == Sign::Plus {
            SeqOrder::Default
        } else {
            SeqOrder::Opposite
        };

        for conn in walk {
            if uniq_seqs.is_empty() {
                let src_node = self.graph.get(&conn.src_id())?;
                uniq_seqs.push(src_node.seq_for(ordering).to_string());
            }

            let dst_node = self.graph.get(&conn.dst_id())?;
            ordering = if conn.dst_sign() == Sign::Plus {
                SeqOrder::Default
            } else {
                SeqOrder::Opposite
            };

            let dst_seq = dst_node.seq_for(ordering);
            uniq_seqs.push(dst_seq[self.current_k - 1..].to_string());
        }

        if uniq_seqs.is_empty() {
            return None;
        }

        Some(uniq_seqs.concat())
    }

    // Sort node edges by prioritizing unwalked edges first, then by the
    // full edge key for deterministic traversal
    fn walkable_edges_in_direction(&self, src: &Node, dir: Sign) -> Vec<Edge> {
        let mut walkable: Vec<Edge> = src
            .edges()
            .iter()
            .copied()
            .filter(|edge| edge.src_sign() == dir)
            .collect();

        walkable.sort_by(|lhs, rhs| {
            let lhs_unwalked = !self.traversed.contains(lhs);
            let rhs_unwalked = !self.traversed.contains(rhs);
            rhs_unwalked
                .cmp(&lhs_unwalked)
                .then_with(|| lhs.src_id().cmp(&rhs.src_id()))
                .then_with(|| lhs.dst_id().cmp(&rhs.dst_id()))
                .then_with(|| lhs.kind().cmp(&rhs.kind()))
        });

        walkable
    }
}

#[cfg(test)]
mod tests {
    use fxhash::FxHashSet;

    use super::*;
    use crate::cbdg::graph::Graph;
    use crate::cbdg::{Label, Read};

    fn reference_only_graph(ref_seq: &str, currk: usize) -> Graph {
        Graph::build_for_tests(ref_seq, &[], currk)
    }

    fn ref_read(ref_seq: &str, qname: &str) -> Read {
        Read {
            qname: qname.to_string(),
            sample_name: "nml".to_string(),
            tag: Label::Normal,
            chrom_index: 0,
            start0: 0,
            sequence: ref_seq.to_string(),
            quals: vec![35; ref_seq.len()],
            map_qual: 60,
            is_reverse_strand: false,
            aln_diff_score: None,
        }
    }

    #[test]
    fn linear_chain_yields_the_reference_walk_once() {
        let ref_seq = "ACGTTGCAAGGCTTACCAGTGCAATGGTCCAGTTACGAC";
        let graph = reference_only_graph(ref_seq, 11);

        let source = graph.ref_node_ids()[0];
        let sink = *graph.ref_node_ids().last().unwrap();
        let mut walker = MaxFlow::new(graph.nodes(), (source, sink), 11);

        let first = walker.next_path();
        assert_eq!(first.as_deref(), Some(ref_seq));

        // no unseen edges remain, the stream is exhausted
        assert_eq!(walker.next_path(), None);
    }

    #[test]
    fn every_path_touches_an_unused_edge() {
        let ref_seq = "ACGTTGCAAGGCTTACCAGTGCAATGGTCCAGTTACGAC";
        let alt_seq = "ACGTTGCAAGGCTTACCACTGCAATGGTCCAGTTACGAC"; // G>C in the middle

        let graph = Graph::build_for_tests(ref_seq, &[ref_read(alt_seq, "alt0")], 11);

        let source = graph.ref_node_ids()[0];
        let sink = *graph.ref_node_ids().last().unwrap();
        let mut walker = MaxFlow::new(graph.nodes(), (source, sink), 11);

        let mut seen = Vec::new();
        while let Some(path) = walker.next_path() {
            seen.push(path);
            assert!(seen.len() <= 4, "walker must terminate");
        }

        assert!(seen.contains(&ref_seq.to_string()));
        assert!(seen.contains(&alt_seq.to_string()));
        // paths are unique
        let uniq: FxHashSet<&String> = seen.iter().collect();
        assert_eq!(uniq.len(), seen.len());
    }
}
