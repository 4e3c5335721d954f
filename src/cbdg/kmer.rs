use crate::base::rev_comp::rev_comp;

/// Strand sign of a k-mer. A node is PLUS when its original sequence
/// lexicographically precedes its reverse complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    #[inline]
    pub fn rev(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }
}

/// Which of the two stored strand sequences of a node to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqOrder {
    Default,
    Opposite,
}

impl SeqOrder {
    #[inline]
    pub fn rev(self) -> SeqOrder {
        match self {
            SeqOrder::Default => SeqOrder::Opposite,
            SeqOrder::Opposite => SeqOrder::Default,
        }
    }
}

/**
 * Canonical k-mer holding both strand sequences.
 *
 * The default sequence is the lexicographically smaller of the original
 * sequence and its reverse complement; the opposite sequence is always the
 * reverse complement of the default. The 64-bit identifier hashes the
 * default sequence, so a k-mer and its reverse complement share a node.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kmer {
    dflt_sign: Sign,
    identifier: u64,
    dflt_seq: String,
    oppo_seq: String,
}

// Overlapping and non-overlapping portions of adjacent merged k-mers
fn non_ovl_prefix(data: &str, kval: usize) -> &str {
    &data[..data.len() - kval + 1]
}

fn non_ovl_suffix(data: &str, kval: usize) -> &str {
    &data[kval - 1..]
}

fn ovl_prefix(data: &str, kval: usize) -> &str {
    &data[..kval - 1]
}

fn ovl_suffix(data: &str, kval: usize) -> &str {
    &data[data.len() - kval + 1..]
}

impl Kmer {
    pub fn new(seq: &str) -> Self {
        let rc_seq = rev_comp(seq);
        if seq < rc_seq.as_str() {
            Self {
                dflt_sign: Sign::Plus,
                identifier: fxhash::hash64(seq),
                dflt_seq: seq.to_string(),
                oppo_seq: rc_seq,
            }
        } else {
            Self {
                dflt_sign: Sign::Minus,
                identifier: fxhash::hash64(&rc_seq),
                dflt_seq: rc_seq,
                oppo_seq: seq.to_string(),
            }
        }
    }

    /// Identifier of the canonical sequence. Stable within a process run.
    pub fn canonical_id(seq: &str) -> u64 {
        let rc_seq = rev_comp(seq);
        if seq < rc_seq.as_str() {
            fxhash::hash64(seq)
        } else {
            fxhash::hash64(&rc_seq)
        }
    }

    #[inline]
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn length(&self) -> usize {
        debug_assert_eq!(self.dflt_seq.len(), self.oppo_seq.len());
        self.dflt_seq.len()
    }

    #[inline]
    pub fn sign_for(&self, order: SeqOrder) -> Sign {
        match order {
            SeqOrder::Default => self.dflt_sign,
            SeqOrder::Opposite => self.dflt_sign.rev(),
        }
    }

    #[inline]
    pub fn seq_for(&self, order: SeqOrder) -> &str {
        match order {
            SeqOrder::Default => &self.dflt_seq,
            SeqOrder::Opposite => &self.oppo_seq,
        }
    }

    /// Merge the sequence of `other` into this k-mer across an edge of the
    /// given kind. Which strand of `other` supplies the appended suffix and
    /// the prepended prefix depends on the sign pair encoded by the kind.
    /// https://github.com/GATB/bcalm/blob/v2.2.3/bidirected-graphs-in-bcalm2/bidirected-graphs-in-bcalm2.md
    pub fn merge(&mut self, other: &Kmer, conn_kind: crate::cbdg::EdgeKind, currk: usize) {
        use crate::cbdg::EdgeKind;

        match conn_kind {
            EdgeKind::PlusPlus => {
                debug_assert_eq!(ovl_suffix(&self.dflt_seq, currk), ovl_prefix(&other.dflt_seq, currk));
                debug_assert_eq!(ovl_prefix(&self.oppo_seq, currk), ovl_suffix(&other.oppo_seq, currk));
                self.dflt_seq.push_str(non_ovl_suffix(&other.dflt_seq, currk));
                self.oppo_seq.insert_str(0, non_ovl_prefix(&other.oppo_seq, currk));
            }
            EdgeKind::PlusMinus => {
                debug_assert_eq!(ovl_suffix(&self.dflt_seq, currk), ovl_prefix(&other.oppo_seq, currk));
                debug_assert_eq!(ovl_prefix(&self.oppo_seq, currk), ovl_suffix(&other.dflt_seq, currk));
                self.dflt_seq.push_str(non_ovl_suffix(&other.oppo_seq, currk));
                self.oppo_seq.insert_str(0, non_ovl_prefix(&other.dflt_seq, currk));
            }
            EdgeKind::MinusPlus => {
                debug_assert_eq!(ovl_suffix(&self.oppo_seq, currk), ovl_prefix(&other.dflt_seq, currk));
                debug_assert_eq!(ovl_prefix(&self.dflt_seq, currk), ovl_suffix(&other.oppo_seq, currk));
                self.dflt_seq.insert_str(0, non_ovl_prefix(&other.oppo_seq, currk));
                self.oppo_seq.push_str(non_ovl_suffix(&other.dflt_seq, currk));
            }
            EdgeKind::MinusMinus => {
                debug_assert_eq!(ovl_suffix(&self.oppo_seq, currk), ovl_prefix(&other.oppo_seq, currk));
                debug_assert_eq!(ovl_prefix(&self.dflt_seq, currk), ovl_suffix(&other.dflt_seq, currk));
                self.dflt_seq.insert_str(0, non_ovl_prefix(&other.dflt_seq, currk));
                self.oppo_seq.push_str(non_ovl_suffix(&other.oppo_seq, currk));
            }
        }
    }
}

/// Sliding canonical k-mers of `window` bases over `seq`.
pub fn sliding_kmers(seq: &str, window: usize) -> Vec<Kmer> {
    crate::base::sliding_view(seq, window)
        .into_iter()
        .map(Kmer::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbdg::edge::EdgeKind;

    #[test]
    fn canonicalization_is_idempotent() {
        for seq in ["ACGTACGTAAA", "TTTACGTACGT", "GGGGGGGGGGG"] {
            let once = Kmer::new(seq);
            let twice = Kmer::new(once.seq_for(SeqOrder::Default));
            assert_eq!(once.identifier(), twice.identifier());
            assert_eq!(once.seq_for(SeqOrder::Default), twice.seq_for(SeqOrder::Default));
        }
    }

    #[test]
    fn revcomp_shares_the_canonical_id() {
        let fwd = Kmer::new("ACCCAGGTTTA");
        let rev = Kmer::new(&rev_comp("ACCCAGGTTTA"));
        assert_eq!(fwd.identifier(), rev.identifier());
        assert_eq!(fwd.identifier(), Kmer::canonical_id("ACCCAGGTTTA"));
        assert_eq!(fwd.sign_for(SeqOrder::Default), rev.sign_for(SeqOrder::Default));
    }

    #[test]
    fn both_strands_have_equal_length() {
        let kmer = Kmer::new("ACGTAGGGTCA");
        assert_eq!(kmer.seq_for(SeqOrder::Default).len(), kmer.seq_for(SeqOrder::Opposite).len());
        assert_eq!(
            rev_comp(kmer.seq_for(SeqOrder::Default)),
            kmer.seq_for(SeqOrder::Opposite)
        );
    }

    /// Pick the edge kind whose k-1 overlap holds between the growing
    /// unitig and the next k-mer, mirroring the merge preconditions.
    fn joining_kind(merged: &Kmer, next: &Kmer, k: usize) -> EdgeKind {
        let dflt = merged.seq_for(SeqOrder::Default);
        let oppo = merged.seq_for(SeqOrder::Opposite);
        let candidates = [
            (EdgeKind::PlusPlus, dflt, next.seq_for(SeqOrder::Default)),
            (EdgeKind::PlusMinus, dflt, next.seq_for(SeqOrder::Opposite)),
            (EdgeKind::MinusPlus, oppo, next.seq_for(SeqOrder::Default)),
            (EdgeKind::MinusMinus, oppo, next.seq_for(SeqOrder::Opposite)),
        ];

        for (kind, lhs, rhs) in candidates {
            if lhs[lhs.len() - k + 1..] == rhs[..k - 1] {
                return kind;
            }
        }

        panic!("no edge kind joins the unitig to the next kmer");
    }

    /// Merging the sliding k-mers of a sequence left to right must rebuild
    /// the original sequence (or its reverse complement) exactly.
    #[test]
    fn chained_merges_rebuild_the_source_sequence() {
        const K: usize = 5;
        let source = "ACCCAGGTTTACGATTACCA";

        let kmers = sliding_kmers(source, K);
        let mut merged = kmers[0].clone();
        for next in kmers.iter().skip(1) {
            let kind = joining_kind(&merged, next, K);
            merged.merge(next, kind, K);
        }

        let dflt = merged.seq_for(SeqOrder::Default);
        let oppo = merged.seq_for(SeqOrder::Opposite);
        assert!(dflt == source || oppo == source, "dflt={dflt} oppo={oppo}");
    }

    /// Rebuilding the same sequence right to left gives the identical
    /// unitig, up to the strand it is stored on.
    #[test]
    fn merge_direction_does_not_change_the_unitig() {
        const K: usize = 5;
        let source = "ACCCAGGTTTACGATTACCA";
        let kmers = sliding_kmers(source, K);

        let mut fwd = kmers[0].clone();
        for next in kmers.iter().skip(1) {
            let kind = joining_kind(&fwd, next, K);
            fwd.merge(next, kind, K);
        }

        let mut rev = kmers.last().unwrap().clone();
        for next in kmers.iter().rev().skip(1) {
            let kind = joining_kind(&rev, next, K);
            rev.merge(next, kind, K);
        }

        let fwd_pair = [fwd.seq_for(SeqOrder::Default), fwd.seq_for(SeqOrder::Opposite)];
        assert!(fwd_pair.contains(&rev.seq_for(SeqOrder::Default)));
        assert!(fwd_pair.contains(&rev.seq_for(SeqOrder::Opposite)));
    }

    #[test]
    fn single_merge_rebuilds_the_k_plus_one_mer() {
        const K: usize = 7;
        let source = "TTGCAGGA"; // k+1 bases
        let first = Kmer::new(&source[..K]);
        let second = Kmer::new(&source[1..]);

        let mut merged = first.clone();
        let kind = joining_kind(&merged, &second, K);
        merged.merge(&second, kind, K);

        assert!(
            merged.seq_for(SeqOrder::Default) == source
                || merged.seq_for(SeqOrder::Opposite) == source
        );
    }
}
