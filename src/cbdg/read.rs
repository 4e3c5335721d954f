use crate::cbdg::Label;

/// A sample read collected for one window. Owned by the read collector
/// result and dropped with it when the window completes.
#[derive(Debug, Clone)]
pub struct Read {
    pub qname: String,
    pub sample_name: String,
    pub tag: Label,
    pub chrom_index: usize,
    pub start0: i64,
    pub sequence: String,
    pub quals: Vec<u8>,
    pub map_qual: u8,
    pub is_reverse_strand: bool,
    pub aln_diff_score: Option<i64>,
}

impl Read {
    pub fn length(&self) -> usize {
        self.sequence.len()
    }

    /// Key identifying one sequenced fragment within a sample, used by the
    /// mate-mer dedup set so a pair never double counts a k-mer.
    pub fn mate_mer_label(&self) -> String {
        format!("{}{}", self.qname, self.sample_name)
    }

    /// Deterministic collection order: tag, sample, qname, then position.
    pub fn sort_key(&self) -> (Label, &str, &str, usize, i64) {
        (
            self.tag,
            self.sample_name.as_str(),
            self.qname.as_str(),
            self.chrom_index,
            self.start0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_read(tag: Label, sample: &str, qname: &str, start0: i64) -> Read {
        Read {
            qname: qname.to_string(),
            sample_name: sample.to_string(),
            tag,
            chrom_index: 0,
            start0,
            sequence: "ACGT".to_string(),
            quals: vec![30; 4],
            map_qual: 60,
            is_reverse_strand: false,
            aln_diff_score: None,
        }
    }

    #[test]
    fn reads_sort_normals_before_tumors() {
        let mut reads = vec![
            make_read(Label::Tumor, "tmr", "q1", 5),
            make_read(Label::Normal, "nml", "q2", 9),
            make_read(Label::Normal, "nml", "q1", 3),
        ];
        reads.sort_by(|lhs, rhs| lhs.sort_key().cmp(&rhs.sort_key()));

        assert_eq!(reads[0].qname, "q1");
        assert_eq!(reads[0].tag, Label::Normal);
        assert_eq!(reads[2].tag, Label::Tumor);
    }
}
