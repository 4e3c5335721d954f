use fxhash::FxHashSet;

/// Word-at-a-time Hamming distance over equal length byte strings.
///
/// XORs 8-byte chunks and reduces the per-byte difference flags with
/// shift/mask rounds before popcounting, handling the tail with a mask.
/// Based off of https://github.com/Daniel-Liu-c0deb0t/triple_accel/blob/master/src/hamming.rs
pub fn hamming_dist_word64(first: &str, second: &str) -> usize {
    debug_assert_eq!(first.len(), second.len());

    let abytes = first.as_bytes();
    let bbytes = second.as_bytes();

    let num_words = first.len() >> 3;
    let rem_bytes = (first.len() & 7) as u64;
    let mut result = 0usize;

    let reduce = |mut val: u64| -> u64 {
        val |= val >> 4;
        val &= 0x0f0f_0f0f_0f0f_0f0f;
        val |= val >> 2;
        val &= 0x3333_3333_3333_3333;
        val |= val >> 1;
        val &= 0x5555_5555_5555_5555;
        val
    };

    let load_word = |bytes: &[u8], word_idx: usize| -> u64 {
        let mut buf = [0u8; 8];
        let start = word_idx << 3;
        let end = (start + 8).min(bytes.len());
        buf[..end - start].copy_from_slice(&bytes[start..end]);
        u64::from_le_bytes(buf)
    };

    for idx in 0..num_words {
        let val = reduce(load_word(abytes, idx) ^ load_word(bbytes, idx));
        result += val.count_ones() as usize;
    }

    if rem_bytes > 0 {
        let val = reduce(load_word(abytes, num_words) ^ load_word(bbytes, num_words));
        // mask out bits beyond the string lengths
        result += (val & ((1u64 << (rem_bytes << 3)) - 1)).count_ones() as usize;
    }

    result
}

pub fn hamming_dist_naive(first: &str, second: &str) -> usize {
    debug_assert_eq!(first.len(), second.len());
    first
        .bytes()
        .zip(second.bytes())
        .filter(|(lhs, rhs)| lhs != rhs)
        .count()
}

/// True when any k-mer in the sliding set occurs more than once.
pub fn has_exact_repeat(kmers: &[&str]) -> bool {
    let uniq_kmers: FxHashSet<&str> = kmers.iter().copied().collect();
    kmers.len() != uniq_kmers.len()
}

/// True when any pair of k-mers is within `num_allowed_mismatches`.
pub fn has_approximate_repeat(kmers: &[&str], num_allowed_mismatches: usize) -> bool {
    for (first_idx, first_kmer) in kmers.iter().enumerate() {
        for second_kmer in kmers.iter().skip(first_idx + 1) {
            if hamming_dist_word64(first_kmer, second_kmer) <= num_allowed_mismatches {
                return true;
            }
        }
    }

    false
}
