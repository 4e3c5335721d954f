/// Complement a single uppercase DNA base. Anything outside ACGT maps to N.
#[inline]
pub fn comp_base(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

/// Reverse complement of an uppercase DNA sequence.
pub fn rev_comp(seq: &str) -> String {
    let mut result = String::with_capacity(seq.len());
    for base in seq.bytes().rev() {
        result.push(comp_base(base) as char);
    }
    result
}

/// Uppercase the sequence and replace every non-ACGT base with N.
pub fn normalize_dna(seq: &str) -> String {
    seq.bytes()
        .map(|base| match base.to_ascii_uppercase() {
            b @ (b'A' | b'C' | b'G' | b'T') => b as char,
            _ => 'N',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rev_comp_round_trips() {
        let seq = "ACCCAGGTTTACGN";
        assert_eq!(rev_comp(&rev_comp(seq)), seq);
    }

    #[test]
    fn rev_comp_simple() {
        assert_eq!(rev_comp("ACGT"), "ACGT");
        assert_eq!(rev_comp("AAAC"), "GTTT");
        assert_eq!(rev_comp("TTGCA"), "TGCAA");
    }

    #[test]
    fn normalize_uppercases_and_masks() {
        assert_eq!(normalize_dna("acgtRYxn"), "ACGTNNNN");
    }
}
