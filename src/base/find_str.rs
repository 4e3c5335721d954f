/// Parameters for the short tandem repeat scan. A reportable STR is a
/// primitive motif of at most `max_str_unit_len` bases repeated at least
/// `min_str_num_units` times over a tract of at least `min_str_length` bases.
#[derive(Debug, Clone, Copy)]
pub struct StrParams {
    pub max_str_unit_len: usize,
    pub min_str_num_units: usize,
    pub min_str_length: usize,
    pub dist_from_str: usize,
}

impl Default for StrParams {
    fn default() -> Self {
        Self {
            max_str_unit_len: 4,
            min_str_num_units: 3,
            min_str_length: 7,
            dist_from_str: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrResult {
    pub found_str: bool,
    pub str_len: usize,
    pub str_motif: String,
}

/// Scan `seq` for tandem repeats and report the one overlapping `pos`
/// (within `dist_from_str` bases), if any.
pub fn find_str(seq: &str, pos: usize, params: &StrParams) -> StrResult {
    let mut result = StrResult::default();
    let bases = seq.as_bytes();

    // offsets[merlen][phase] tracks the start of the current candidate tandem
    let mut offsets = vec![vec![0usize; params.max_str_unit_len + 1]; params.max_str_unit_len + 1];
    for merlen in 1..=params.max_str_unit_len {
        for phase in 0..merlen {
            offsets[merlen][phase] = phase;
        }
    }

    for bpos in 0..bases.len() {
        for merlen in 1..=params.max_str_unit_len {
            let phase = bpos % merlen;
            let offset = offsets[merlen][phase];

            // compare [bpos..bpos+merlen) to [offset..offset+merlen)
            let mut end_idx = 0usize;
            while end_idx < merlen
                && bpos + end_idx < bases.len()
                && bases[bpos + end_idx] == bases[offset + end_idx]
            {
                end_idx += 1;
            }

            // is end_idx the end of the tandem?
            if end_idx != merlen || bpos + end_idx + 1 == bases.len() {
                // am i the leftmost version of this tandem?
                if (offset == 0 || bases[offset - 1] != bases[offset + merlen - 1])
                    && ((bpos - offset) / merlen) >= params.min_str_num_units
                    && (bpos - offset) >= params.min_str_length
                {
                    // is the motif primitive?
                    let mut mlen = 1usize;
                    while mlen < merlen {
                        let units = (bpos - offset + end_idx) / mlen;
                        let mut allmatch = true;
                        'unit_scan: for tmp_idx in 1..units {
                            for other in 0..mlen {
                                if bases[offset + other] != bases[offset + tmp_idx * mlen + other] {
                                    allmatch = false;
                                    break 'unit_scan;
                                }
                            }
                        }

                        if allmatch {
                            break;
                        }
                        mlen += 1;
                    }

                    if mlen == merlen {
                        let start = offset.saturating_sub(params.dist_from_str);
                        let end = bpos + end_idx;

                        if pos >= start && pos <= end + params.dist_from_str {
                            result.found_str = true;
                            result.str_len = bpos + end_idx - offset;
                            result.str_motif = seq[offset..offset + merlen].to_string();
                        }
                    }
                }

                offsets[merlen][phase] = bpos;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_dinucleotide_tract() {
        //           0123456789012345
        let seq = "GGGCATATATATATGGG";
        let result = find_str(seq, 7, &StrParams::default());
        assert!(result.found_str);
        assert_eq!(result.str_motif, "AT");
        assert!(result.str_len >= 8);
    }

    #[test]
    fn position_outside_tract_is_not_flagged() {
        let seq = "ATATATATATGGGCCCGGGCCCGGGCCACAG";
        let result = find_str(seq, 25, &StrParams::default());
        assert!(!result.found_str);
    }

    #[test]
    fn short_tract_is_ignored() {
        // only two AT units, below the unit and length thresholds
        let seq = "GGGCATATGGGCCAA";
        let result = find_str(seq, 5, &StrParams::default());
        assert!(!result.found_str);
    }

    #[test]
    fn homopolymer_is_reported_with_unit_motif() {
        let seq = "CGTAAAAAAAAAGTC";
        let result = find_str(seq, 6, &StrParams::default());
        assert!(result.found_str);
        assert_eq!(result.str_motif, "A");
    }
}
