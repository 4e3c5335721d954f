use statrs::function::gamma::ln_gamma;

const MAX_PHRED_SCORE: f64 = 255.0;

lazy_static! {
    // log factorials for every count a window can realistically produce
    static ref LN_FACTORIAL_CACHE: Vec<f64> = (0..4096u64).map(|n| ln_gamma(n as f64 + 1.0)).collect();
}

fn ln_factorial(count: u64) -> f64 {
    match LN_FACTORIAL_CACHE.get(count as usize) {
        Some(value) => *value,
        None => ln_gamma(count as f64 + 1.0),
    }
}

fn ln_hypergeometric_prob(a: u64, b: u64, c: u64, d: u64) -> f64 {
    ln_factorial(a + b) + ln_factorial(c + d) + ln_factorial(a + c) + ln_factorial(b + d)
        - ln_factorial(a)
        - ln_factorial(b)
        - ln_factorial(c)
        - ln_factorial(d)
        - ln_factorial(a + b + c + d)
}

/// Two-sided Fisher's exact test on the 2x2 contingency table
/// `[[a, b], [c, d]]`: the sum of the probabilities of every table with
/// the same margins that is at most as likely as the observed one.
pub fn fisher_exact_two_sided(a: u64, b: u64, c: u64, d: u64) -> f64 {
    let row1 = a + b;
    let col1 = a + c;
    let col2 = b + d;

    if a + b + c + d == 0 {
        return 1.0;
    }

    let ln_p_observed = ln_hypergeometric_prob(a, b, c, d);
    let cutoff = ln_p_observed + 1e-7;

    let a_min = row1.saturating_sub(col2);
    let a_max = row1.min(col1);

    let mut p_total = 0.0f64;
    for a_alt in a_min..=a_max {
        let b_alt = row1 - a_alt;
        let c_alt = col1 - a_alt;
        let d_alt = col2 - b_alt;
        let ln_p = ln_hypergeometric_prob(a_alt, b_alt, c_alt, d_alt);
        if ln_p <= cutoff {
            p_total += ln_p.exp();
        }
    }

    p_total.min(1.0)
}

/// Phred-scaled p-value clamped to `[0, 255]`.
pub fn phred_scaled(p_value: f64) -> f64 {
    if p_value <= 0.0 {
        return MAX_PHRED_SCORE;
    }
    (-10.0 * p_value.log10()).clamp(0.0, MAX_PHRED_SCORE)
}
