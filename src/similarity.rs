/*!
 * String similarity scores on a 0-100 scale
 *
 * `ratio` is the normalized indel similarity `200 * LCS / (len_a + len_b)`.
 * `partial_ratio` aligns the shorter string against every substring of the
 * longer one (including windows hanging off either end) and keeps the best
 * `ratio`, so "smith" scores 100 against "smithson". Equal-length strings
 * are aligned both ways and the better score wins.
 *
 * Both work on `char`s, so non-ASCII surnames are compared by code point.
 */

/// Normalized similarity of two strings, 0.0 to 100.0
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best `ratio` of the shorter string against any alignment in the longer one
///
/// Equal-length inputs are aligned both ways and the higher score kept.
/// Empty input on either side scores 0.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    if a.len() < b.len() {
        return best_alignment(&a, &b);
    }
    if a.len() > b.len() {
        return best_alignment(&b, &a);
    }

    let forward = best_alignment(&a, &b);
    if forward >= 100.0 {
        return 100.0;
    }
    forward.max(best_alignment(&b, &a))
}

/// Highest `ratio` of `shorter` against the windows of `longer`
///
/// A window is only scored when its edge character occurs in `shorter`.
fn best_alignment(shorter: &[char], longer: &[char]) -> f64 {
    let n = shorter.len();
    let m = longer.len();
    let mut best = 0.0f64;

    // Windows growing in from the left edge
    for end in 1..n {
        if shorter.contains(&longer[end - 1]) {
            best = best.max(ratio_chars(shorter, &longer[..end]));
            if best >= 100.0 {
                return 100.0;
            }
        }
    }

    // Full-length windows except the last
    for start in 0..(m - n) {
        let window = &longer[start..start + n];
        if shorter.contains(&window[n - 1]) {
            best = best.max(ratio_chars(shorter, window));
            if best >= 100.0 {
                return 100.0;
            }
        }
    }

    // The last full-length window, then windows shrinking towards the right edge
    for start in (m - n)..m {
        if shorter.contains(&longer[start]) {
            best = best.max(ratio_chars(shorter, &longer[start..]));
            if best >= 100.0 {
                return 100.0;
            }
        }
    }

    best
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

/// Longest common subsequence length, two-row dynamic programming
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
