use std::collections::BinaryHeap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write as IoWrite};
use std::path::Path;

use fxhash::FxHashMap;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

pub const ALIGN_GAP: char = '-';

// asm5 from minimap2 -> assembly to same species ref scoring
// https://curiouscoding.nl/posts/pairwise-alignment -> convex affine gap
// scoring -> gap(l) = max(open1 + (l-1)*ext1, open2 + (l-1)*ext2)
const MATCH: i32 = 1;
const MISMATCH: i32 = -19;
const OPEN1: i32 = -81;
const EXTEND1: i32 = -1;
const OPEN2: i32 = -39;
const EXTEND2: i32 = -3;

const NEG_INF: i32 = i32::MIN / 4;

#[derive(Debug, Clone, Copy)]
struct PoaBase {
    base: u8,
    ring_id: Option<usize>,
}

/// One aligned pair from the DP traceback: a graph node, a sequence
/// position, or both (match/mismatch).
type AlignedPair = (Option<NodeIndex>, Option<usize>);

/**
 * Partial-order alignment of the reference anchor and alternate haplotypes.
 *
 * Sequences are aligned to the growing graph one at a time with global DP
 * and convex-affine gap scoring; both orientations are scored and the
 * better one is committed. Mismatching bases aligned to a node join its
 * ring so every ring occupies one MSA column.
 */
pub struct MsaBuilder {
    haplotype_seqs: Vec<String>,
    result_msa: Vec<String>,
}

struct PoaGraph {
    graph: StableDiGraph<PoaBase, ()>,
    rings: Vec<Vec<NodeIndex>>,
    seq_paths: Vec<Vec<NodeIndex>>,
}

impl MsaBuilder {
    pub fn new(ref_and_alt_haps: &[String], out_fasta_dir: Option<&Path>, window_id: &str) -> Self {
        let mut poa = PoaGraph::new();
        let mut oriented_seqs: Vec<String> = Vec::with_capacity(ref_and_alt_haps.len());

        for (hap_idx, haplotype) in ref_and_alt_haps.iter().enumerate() {
            if hap_idx == 0 || poa.graph.node_count() == 0 {
                poa.add_first_sequence(haplotype);
                oriented_seqs.push(haplotype.clone());
                continue;
            }

            let fwd_aln = poa.align(haplotype);
            let rc_seq = crate::base::rev_comp::rev_comp(haplotype);
            let rc_aln = poa.align(&rc_seq);

            if rc_aln.0 > fwd_aln.0 {
                poa.add_alignment(&rc_aln.1, &rc_seq);
                oriented_seqs.push(rc_seq);
            } else {
                poa.add_alignment(&fwd_aln.1, haplotype);
                oriented_seqs.push(haplotype.clone());
            }
        }

        let result_msa = poa.generate_msa();
        let builder = Self {
            haplotype_seqs: oriented_seqs,
            result_msa,
        };

        if let Some(dir) = out_fasta_dir {
            builder.write_fasta(dir, window_id);
        }

        builder
    }

    pub fn multiple_sequence_alignment(&self) -> &[String] {
        &self.result_msa
    }

    /// Haplotype sequence in the orientation it entered the MSA.
    pub fn fetch_haplotype_seq(&self, hap_idx: usize) -> &str {
        &self.haplotype_seqs[hap_idx]
    }

    /// All haplotypes in MSA orientation, reference anchor first.
    pub fn haplotypes(&self) -> &[String] {
        &self.haplotype_seqs
    }

    pub fn num_sequences(&self) -> usize {
        self.haplotype_seqs.len()
    }

    fn write_fasta(&self, out_dir: &Path, window_id: &str) {
        let msa_dir = out_dir.join("poa_msa");
        if create_dir_all(&msa_dir).is_err() {
            return;
        }

        let handle = match File::create(msa_dir.join(format!("msa__{window_id}.fasta"))) {
            Ok(fhandle) => fhandle,
            Err(_) => return,
        };

        let mut out = BufWriter::new(handle);
        for (idx, aln) in self.result_msa.iter().enumerate() {
            let name = if idx == 0 { "ref".to_string() } else { format!("hap{idx}") };
            let _ = writeln!(out, ">{name}\n{aln}");
        }
    }
}

impl PoaGraph {
    fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            rings: Vec::new(),
            seq_paths: Vec::new(),
        }
    }

    fn add_first_sequence(&mut self, seq: &str) {
        let mut path: Vec<NodeIndex> = Vec::with_capacity(seq.len());
        let mut prev: Option<NodeIndex> = None;

        for base in seq.bytes() {
            let node = self.graph.add_node(PoaBase { base, ring_id: None });
            if let Some(prev_node) = prev {
                self.graph.add_edge(prev_node, node, ());
            }
            path.push(node);
            prev = Some(node);
        }

        self.seq_paths.push(path);
    }

    /// Global alignment of `seq` against the graph. Returns the score and
    /// the aligned pairs in graph/sequence order.
    fn align(&self, seq: &str) -> (i32, Vec<AlignedPair>) {
        let topo = self.topo_nodes();
        let num_rows = topo.len() + 1;
        let num_cols = seq.len() + 1;
        let bases = seq.as_bytes();

        let mut row_of: FxHashMap<NodeIndex, usize> = FxHashMap::default();
        for (pos, node) in topo.iter().enumerate() {
            row_of.insert(*node, pos + 1);
        }

        // preds[i] holds DP rows feeding node row i; the virtual row 0
        // feeds nodes with no graph predecessor
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); num_rows];
        for (pos, node) in topo.iter().enumerate() {
            let mut prows: Vec<usize> = self
                .graph
                .neighbors_directed(*node, Direction::Incoming)
                .map(|pred| row_of[&pred])
                .collect();
            prows.sort_unstable();
            if prows.is_empty() {
                prows.push(0);
            }
            preds[pos + 1] = prows;
        }

        let idx = |row: usize, col: usize| row * num_cols + col;
        let mut mat_h = vec![NEG_INF; num_rows * num_cols];
        let mut mat_e1 = vec![NEG_INF; num_rows * num_cols];
        let mut mat_e2 = vec![NEG_INF; num_rows * num_cols];
        let mut mat_f1 = vec![NEG_INF; num_rows * num_cols];
        let mut mat_f2 = vec![NEG_INF; num_rows * num_cols];

        mat_h[idx(0, 0)] = 0;
        for col in 1..num_cols {
            mat_e1[idx(0, col)] = (mat_h[idx(0, col - 1)] + OPEN1).max(mat_e1[idx(0, col - 1)] + EXTEND1);
            mat_e2[idx(0, col)] = (mat_h[idx(0, col - 1)] + OPEN2).max(mat_e2[idx(0, col - 1)] + EXTEND2);
            mat_h[idx(0, col)] = mat_e1[idx(0, col)].max(mat_e2[idx(0, col)]);
        }

        for row in 1..num_rows {
            let node_base = self.graph[topo[row - 1]].base;

            for prow in &preds[row] {
                mat_f1[idx(row, 0)] =
                    mat_f1[idx(row, 0)].max((mat_h[idx(*prow, 0)] + OPEN1).max(mat_f1[idx(*prow, 0)] + EXTEND1));
                mat_f2[idx(row, 0)] =
                    mat_f2[idx(row, 0)].max((mat_h[idx(*prow, 0)] + OPEN2).max(mat_f2[idx(*prow, 0)] + EXTEND2));
            }
            mat_h[idx(row, 0)] = mat_f1[idx(row, 0)].max(mat_f2[idx(row, 0)]);

            for col in 1..num_cols {
                let sub = if node_base == bases[col - 1] { MATCH } else { MISMATCH };

                let mut best_diag = NEG_INF;
                let mut best_f1 = NEG_INF;
                let mut best_f2 = NEG_INF;
                for prow in &preds[row] {
                    best_diag = best_diag.max(mat_h[idx(*prow, col - 1)] + sub);
                    best_f1 = best_f1.max((mat_h[idx(*prow, col)] + OPEN1).max(mat_f1[idx(*prow, col)] + EXTEND1));
                    best_f2 = best_f2.max((mat_h[idx(*prow, col)] + OPEN2).max(mat_f2[idx(*prow, col)] + EXTEND2));
                }

                let e1 = (mat_h[idx(row, col - 1)] + OPEN1).max(mat_e1[idx(row, col - 1)] + EXTEND1);
                let e2 = (mat_h[idx(row, col - 1)] + OPEN2).max(mat_e2[idx(row, col - 1)] + EXTEND2);

                mat_e1[idx(row, col)] = e1;
                mat_e2[idx(row, col)] = e2;
                mat_f1[idx(row, col)] = best_f1;
                mat_f2[idx(row, col)] = best_f2;
                mat_h[idx(row, col)] = best_diag.max(best_f1).max(best_f2).max(e1).max(e2);
            }
        }

        // alignment must end at a node without successors, or at the
        // virtual row for an empty graph
        let mut end_row = 0usize;
        let mut best_score = NEG_INF;
        for (pos, node) in topo.iter().enumerate() {
            if self.graph.neighbors_directed(*node, Direction::Outgoing).next().is_some() {
                continue;
            }
            let score = mat_h[idx(pos + 1, num_cols - 1)];
            if score > best_score {
                best_score = score;
                end_row = pos + 1;
            }
        }
        if topo.is_empty() {
            best_score = mat_h[idx(0, num_cols - 1)];
        }

        // Traceback by value recomputation: diagonal first, then graph
        // gaps, then sequence gaps, so ties resolve identically every run
        let mut pairs: Vec<AlignedPair> = Vec::with_capacity(num_rows + num_cols);
        let mut row = end_row;
        let mut col = num_cols - 1;

        'outer: while row != 0 || col != 0 {
            let here = mat_h[idx(row, col)];

            if row > 0 && col > 0 {
                let node_base = self.graph[topo[row - 1]].base;
                let sub = if node_base == bases[col - 1] { MATCH } else { MISMATCH };
                for prow in &preds[row] {
                    if mat_h[idx(*prow, col - 1)] + sub == here {
                        pairs.push((Some(topo[row - 1]), Some(col - 1)));
                        row = *prow;
                        col -= 1;
                        continue 'outer;
                    }
                }
            }

            if row > 0 {
                for (fmat, open, extend) in [(&mat_f1, OPEN1, EXTEND1), (&mat_f2, OPEN2, EXTEND2)] {
                    if fmat[idx(row, col)] == here {
                        // follow the deletion chain through graph rows
                        let mut frow = row;
                        loop {
                            pairs.push((Some(topo[frow - 1]), None));
                            let fval = fmat[idx(frow, col)];
                            let mut advanced = false;
                            for prow in &preds[frow] {
                                if mat_h[idx(*prow, col)] + open == fval {
                                    row = *prow;
                                    advanced = true;
                                    break;
                                }
                            }
                            if advanced {
                                break;
                            }
                            for prow in &preds[frow] {
                                if fmat[idx(*prow, col)] + extend == fval {
                                    frow = *prow;
                                    advanced = true;
                                    break;
                                }
                            }
                            if !advanced {
                                // numeric dead end cannot happen on a valid matrix
                                row = preds[frow][0];
                                break;
                            }
                        }
                        continue 'outer;
                    }
                }
            }

            if col > 0 {
                for (emat, open, extend) in [(&mat_e1, OPEN1, EXTEND1), (&mat_e2, OPEN2, EXTEND2)] {
                    if emat[idx(row, col)] == here {
                        loop {
                            pairs.push((None, Some(col - 1)));
                            let eval = emat[idx(row, col)];
                            col -= 1;
                            if mat_h[idx(row, col)] + open == eval {
                                break;
                            }
                            if !(col > 0 && emat[idx(row, col)] + extend == eval) {
                                break;
                            }
                        }
                        continue 'outer;
                    }
                }
            }

            // row == 0 leading insertions or col == 0 leading deletions
            if col > 0 {
                pairs.push((None, Some(col - 1)));
                col -= 1;
            } else {
                pairs.push((Some(topo[row - 1]), None));
                row = preds[row][0];
            }
        }

        pairs.reverse();
        (best_score, pairs)
    }

    fn add_alignment(&mut self, pairs: &[AlignedPair], seq: &str) {
        let bases = seq.as_bytes();
        let mut prev: Option<NodeIndex> = None;
        let mut path: Vec<NodeIndex> = Vec::with_capacity(seq.len());

        for (node_opt, pos_opt) in pairs {
            let seq_pos = match pos_opt {
                Some(pos) => *pos,
                None => continue, // deletion consumes only the graph
            };
            let base = bases[seq_pos];

            let node = match node_opt {
                Some(aligned_node) => self.matching_ring_node(*aligned_node, base),
                None => self.graph.add_node(PoaBase { base, ring_id: None }),
            };

            if let Some(prev_node) = prev {
                if self.graph.find_edge(prev_node, node).is_none() {
                    self.graph.add_edge(prev_node, node, ());
                }
            }

            path.push(node);
            prev = Some(node);
        }

        self.seq_paths.push(path);
    }

    /// Reuse the aligned node or a ring member with the same base, else
    /// grow the ring with a fresh node.
    fn matching_ring_node(&mut self, aligned_node: NodeIndex, base: u8) -> NodeIndex {
        if self.graph[aligned_node].base == base {
            return aligned_node;
        }

        if let Some(ring_id) = self.graph[aligned_node].ring_id {
            for member in &self.rings[ring_id] {
                if self.graph[*member].base == base {
                    return *member;
                }
            }

            let node = self.graph.add_node(PoaBase { base, ring_id: Some(ring_id) });
            self.rings[ring_id].push(node);
            return node;
        }

        let ring_id = self.rings.len();
        let node = self.graph.add_node(PoaBase { base, ring_id: Some(ring_id) });
        self.graph[aligned_node].ring_id = Some(ring_id);
        self.rings.push(vec![aligned_node, node]);
        node
    }

    fn topo_nodes(&self) -> Vec<NodeIndex> {
        petgraph::algo::toposort(&self.graph, None).expect("POA graph stays acyclic")
    }

    /// Column-aligned MSA. Every ring (or lone node) is one column; column
    /// order is a ring-aware topological order of the graph.
    fn generate_msa(&self) -> Vec<String> {
        let group_of = |node: NodeIndex| -> usize {
            match self.graph[node].ring_id {
                Some(ring_id) => ring_id,
                None => self.rings.len() + node.index(),
            }
        };

        // Kahn over ring groups, smallest member index first for stable
        // column order
        let mut indegree: FxHashMap<usize, usize> = FxHashMap::default();
        let mut group_repr: FxHashMap<usize, usize> = FxHashMap::default();
        for node in self.graph.node_indices() {
            let group = group_of(node);
            indegree.entry(group).or_insert(0);
            let repr = group_repr.entry(group).or_insert(usize::MAX);
            *repr = (*repr).min(node.index());
        }

        let mut group_edges: Vec<(usize, usize)> = Vec::new();
        for edge in self.graph.edge_indices() {
            let (src, dst) = self.graph.edge_endpoints(edge).expect("edge endpoints");
            let (gsrc, gdst) = (group_of(src), group_of(dst));
            if gsrc != gdst {
                group_edges.push((gsrc, gdst));
                *indegree.entry(gdst).or_insert(0) += 1;
            }
        }

        let mut ready: BinaryHeap<std::cmp::Reverse<(usize, usize)>> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(group, _)| std::cmp::Reverse((group_repr[group], *group)))
            .collect();

        let mut column_of_group: FxHashMap<usize, usize> = FxHashMap::default();
        let mut next_column = 0usize;
        while let Some(std::cmp::Reverse((_, group))) = ready.pop() {
            column_of_group.insert(group, next_column);
            next_column += 1;

            for (gsrc, gdst) in &group_edges {
                if *gsrc != group {
                    continue;
                }
                let deg = indegree.get_mut(gdst).expect("group indegree exists");
                *deg -= 1;
                if *deg == 0 {
                    ready.push(std::cmp::Reverse((group_repr[gdst], *gdst)));
                }
            }
        }

        // degenerate group cycles cannot happen with NW alignments, but an
        // unassigned group must never panic the caller
        for node in self.graph.node_indices() {
            let group = group_of(node);
            if !column_of_group.contains_key(&group) {
                column_of_group.insert(group, next_column);
                next_column += 1;
            }
        }

        let num_columns = next_column;
        let mut rows: Vec<String> = Vec::with_capacity(self.seq_paths.len());
        for path in &self.seq_paths {
            let mut row = vec![ALIGN_GAP as u8; num_columns];
            for node in path {
                let column = column_of_group[&group_of(*node)];
                row[column] = self.graph[*node].base;
            }
            rows.push(String::from_utf8(row).expect("ascii MSA row"));
        }

        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msa_of(seqs: &[&str]) -> Vec<String> {
        let owned: Vec<String> = seqs.iter().map(|s| s.to_string()).collect();
        let builder = MsaBuilder::new(&owned, None, "test");
        builder.multiple_sequence_alignment().to_vec()
    }

    fn ungapped(aln: &str) -> String {
        aln.chars().filter(|ch| *ch != ALIGN_GAP).collect()
    }

    #[test]
    fn identical_sequences_align_without_gaps() {
        let seq = "ACGTACGGTTTCAGCATTGCA";
        let msa = msa_of(&[seq, seq]);
        assert_eq!(msa.len(), 2);
        assert_eq!(msa[0], msa[1]);
        assert_eq!(msa[0], seq);
    }

    #[test]
    fn rows_are_equal_length_and_preserve_sequences() {
        let reference = "ACGTACGGTTTCAGCATTGCAGGATTACCAGAGGACA";
        let snv_hap = "ACGTACGGTTTCAGCATTGCAGGATTACCAGAGGACA".replace("CAGCA", "CAGTA");
        let del_hap = "ACGTACGGTTTCATTGCAGGATTACCAGAGGACA"; // 3bp deletion

        let msa = msa_of(&[reference, &snv_hap, del_hap]);
        assert_eq!(msa.len(), 3);
        assert!(msa.iter().all(|row| row.len() == msa[0].len()));

        assert_eq!(ungapped(&msa[0]), reference);
        assert_eq!(ungapped(&msa[1]), snv_hap);
        assert_eq!(ungapped(&msa[2]), del_hap);
    }

    #[test]
    fn snv_keeps_columns_aligned() {
        let reference = "ACGTACGGTTTCAGCATTGCAGGAT";
        let alt = "ACGTACGGTTTCGGCATTGCAGGAT"; // A>G at offset 12

        let msa = msa_of(&[reference, alt]);
        assert_eq!(msa[0].len(), msa[1].len());

        let diff_cols: Vec<usize> = msa[0]
            .bytes()
            .zip(msa[1].bytes())
            .enumerate()
            .filter(|(_, (lhs, rhs))| lhs != rhs)
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(diff_cols.len(), 1);
        assert_eq!(msa[0].as_bytes()[diff_cols[0]], b'A');
        assert_eq!(msa[1].as_bytes()[diff_cols[0]], b'G');
    }

    #[test]
    fn insertion_becomes_a_gap_in_the_reference_row() {
        let reference = "ACGTACGGTTTCAGCATTGCAGGAT";
        let alt = "ACGTACGGTTTCAGTTTCATTGCAGGAT"; // insertion after CAG

        let msa = msa_of(&[reference, alt]);
        assert_eq!(msa[0].len(), msa[1].len());
        assert_eq!(ungapped(&msa[0]), reference);
        assert_eq!(ungapped(&msa[1]), alt);
        assert!(msa[0].contains(ALIGN_GAP));
        assert!(!msa[1].contains(ALIGN_GAP));
    }
}
