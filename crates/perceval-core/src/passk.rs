//! Unbiased pass@k estimator.
//!
//! For `n` i.i.d. samples of which `c` are correct, pass@k is the probability
//! that a uniformly drawn k-subset contains at least one correct sample:
//! `1 - C(n-c, k) / C(n, k)`.

use std::collections::BTreeMap;

/// k values reported by default.
pub const DEFAULT_KS: [usize; 5] = [1, 2, 4, 8, 16];

pub fn pass_key(k: usize) -> String {
    format!("pass@{k}")
}

/// pass@k for `n` samples with `c` correct. `None` when `k` is 0 or exceeds `n`;
/// such k values are not reported at all.
pub fn pass_at_k(n: usize, c: usize, k: usize) -> Option<f64> {
    if k == 0 || k > n {
        return None;
    }
    if c == 0 {
        return Some(0.0);
    }
    // Fewer than k incorrect samples: every k-subset holds a correct one.
    if n - c < k {
        return Some(1.0);
    }
    Some(1.0 - binomial_ratio(n, c, k))
}

/// `C(n-c, k) / C(n, k)` as the product `prod_{i<k} (n-c-i) / (n-i)`, which
/// never materialises the (possibly huge) binomials. Requires `n - c >= k`.
fn binomial_ratio(n: usize, c: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |ratio, i| ratio * (n - c - i) as f64 / (n - i) as f64)
}

/// Estimate every requested k over a correctness vector. Keys are `pass@{k}`.
pub fn pass_at_ks(correct: &[bool], ks: &[usize]) -> BTreeMap<String, f64> {
    let n = correct.len();
    let c = correct.iter().filter(|&&ok| ok).count();
    ks.iter()
        .filter_map(|&k| pass_at_k(n, c, k).map(|score| (pass_key(k), score)))
        .collect()
}
