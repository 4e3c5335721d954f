use smallvec::SmallVec;

use crate::cbdg::edge::{Edge, EdgeKind};
use crate::cbdg::kmer::{Kmer, SeqOrder, Sign};
use crate::cbdg::Label;

/// Per-color read support counters for a node.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleCov {
    normal: u32,
    tumor: u32,
}

impl SampleCov {
    #[inline]
    pub fn total(&self) -> u32 {
        self.normal + self.tumor
    }
}

/**
 * Node of the colored bidirected de Bruijn graph.
 *
 * Owns its (possibly compacted) k-mer, the outgoing edge list and the
 * per-color read support. Nodes are keyed in the graph table by the k-mer
 * identifier, which never changes across unitig compression.
 */
#[derive(Debug, Clone)]
pub struct Node {
    kmer: Kmer,
    comp_id: usize,
    labels: u8,
    cov: SampleCov,
    edges: SmallVec<[Edge; 4]>,
}

impl Node {
    pub fn new(seq: &str, label: Label) -> Self {
        Self {
            kmer: Kmer::new(seq),
            comp_id: 0,
            labels: 1u8 << (label as u8),
            cov: SampleCov::default(),
            edges: SmallVec::new(),
        }
    }

    #[inline]
    pub fn identifier(&self) -> u64 {
        self.kmer.identifier()
    }

    pub fn seq_length(&self) -> usize {
        self.kmer.length()
    }

    #[inline]
    pub fn sign_for(&self, order: SeqOrder) -> Sign {
        self.kmer.sign_for(order)
    }

    #[inline]
    pub fn seq_for(&self, order: SeqOrder) -> &str {
        self.kmer.seq_for(order)
    }

    pub fn component_id(&self) -> usize {
        self.comp_id
    }

    pub fn set_component_id(&mut self, comp_id: usize) {
        self.comp_id = comp_id;
    }

    pub fn add_label(&mut self, label: Label) {
        self.labels |= 1u8 << (label as u8);
    }

    pub fn has_label(&self, label: Label) -> bool {
        self.labels & (1u8 << (label as u8)) != 0
    }

    pub fn is_ref_node(&self) -> bool {
        self.has_label(Label::Reference)
    }

    pub fn is_shared(&self) -> bool {
        self.has_label(Label::Normal) && self.has_label(Label::Tumor)
    }

    pub fn is_tumor_only(&self) -> bool {
        self.has_label(Label::Tumor) && !self.has_label(Label::Normal)
    }

    pub fn is_normal_only(&self) -> bool {
        self.has_label(Label::Normal) && !self.has_label(Label::Tumor)
    }

    /// Read support is monotonically non-decreasing during graph build.
    pub fn increment_read_support(&mut self, label: Label) {
        self.add_label(label);
        match label {
            Label::Normal => self.cov.normal += 1,
            Label::Tumor => self.cov.tumor += 1,
            Label::Reference => {}
        }
    }

    pub fn normal_read_support(&self) -> u32 {
        self.cov.normal
    }

    pub fn tumor_read_support(&self) -> u32 {
        self.cov.tumor
    }

    pub fn total_read_support(&self) -> u32 {
        self.cov.total()
    }

    pub fn num_out_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn has_self_loop(&self) -> bool {
        self.edges.iter().any(Edge::is_self_loop)
    }

    pub fn emplace_edge(&mut self, edge: Edge) {
        debug_assert_eq!(edge.src_id(), self.identifier());
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    pub fn erase_edge(&mut self, edge: &Edge) {
        self.edges.retain(|existing| existing != edge);
    }

    /// Outgoing edges whose source sign matches this node's sign in the
    /// requested ordering, i.e. the edges walkable when the node is read
    /// in that orientation.
    pub fn find_edges_in_direction(&self, order: SeqOrder) -> SmallVec<[Edge; 4]> {
        let wanted = self.sign_for(order);
        self.edges
            .iter()
            .copied()
            .filter(|edge| edge.src_sign() == wanted)
            .collect()
    }

    /// Merge a compressible buddy into this node: sequence via the cord
    /// merge, support and labels by accumulation.
    pub fn merge(&mut self, buddy: &Node, conn_kind: EdgeKind, currk: usize) {
        self.kmer.merge(&buddy.kmer, conn_kind, currk);
        self.cov.normal += buddy.cov.normal;
        self.cov.tumor += buddy.cov.tumor;
        self.labels |= buddy.labels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbdg::edge::make_fwd_edge_kind;

    #[test]
    fn emplace_is_idempotent() {
        let mut node = Node::new("ACGTACGTAAC", Label::Reference);
        let edge = Edge::new(node.identifier(), 99, EdgeKind::PlusPlus);
        node.emplace_edge(edge);
        node.emplace_edge(edge);
        assert_eq!(node.num_out_edges(), 1);

        node.erase_edge(&edge);
        assert_eq!(node.num_out_edges(), 0);
    }

    #[test]
    fn support_and_labels_accumulate() {
        let mut node = Node::new("ACGTACGTAAC", Label::Reference);
        assert_eq!(node.total_read_support(), 0);
        node.increment_read_support(Label::Tumor);
        node.increment_read_support(Label::Tumor);
        node.increment_read_support(Label::Normal);
        assert_eq!(node.tumor_read_support(), 2);
        assert_eq!(node.normal_read_support(), 1);
        assert_eq!(node.total_read_support(), 3);
        assert!(node.is_shared());
        assert!(node.is_ref_node());
    }

    #[test]
    fn directional_edge_lookup_follows_node_sign() {
        let node = Node::new("AAAAAAAAAAC", Label::Normal);
        assert_eq!(node.sign_for(SeqOrder::Default), Sign::Plus);

        let mut node = node;
        let id = node.identifier();
        let fwd = Edge::new(id, 5, make_fwd_edge_kind(Sign::Plus, Sign::Plus));
        let bwd = Edge::new(id, 6, make_fwd_edge_kind(Sign::Minus, Sign::Plus));
        node.emplace_edge(fwd);
        node.emplace_edge(bwd);

        let dflt_edges = node.find_edges_in_direction(SeqOrder::Default);
        assert_eq!(dflt_edges.len(), 1);
        assert_eq!(dflt_edges[0], fwd);

        let oppo_edges = node.find_edges_in_direction(SeqOrder::Opposite);
        assert_eq!(oppo_edges.len(), 1);
        assert_eq!(oppo_edges[0], bwd);
    }
}
