//src/kmers.rs

use crate::error::{Result, ShovillError};

/// Smallest k used for reads of typical length.
pub const MIN_K: usize = 31;
/// Largest k any supported assembler accepts.
pub const MAX_K: usize = 127;
/// Floor for short reads, and the lowest k a user list may contain.
pub const SHORT_READ_MIN_K: usize = 21;
/// Reads shorter than this drop the minimum k to `SHORT_READ_MIN_K`.
pub const SHORT_READ_LEN: usize = 75;
/// Largest k as a fraction of the average read length.
pub const KMER_READ_FRAC: f64 = 0.75;
/// Number of k values aimed for by auto-derivation.
pub const KMER_POINTS: usize = 5;
/// Minimum distance between consecutive k values.
pub const MIN_KMER_STEP: usize = 5;

/// Ordered list of odd k-mer sizes handed to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerPlan {
    kmers: Vec<usize>,
}

impl KmerPlan {
    /// Build the plan from a user list if one was given, else derive it from
    /// the average read length.
    pub fn new(avg_len: usize, user_kmers: Option<&str>) -> Result<Self> {
        let kmers = match user_kmers {
            Some(list) => parse_user_kmers(list, avg_len)?,
            None => auto_kmers(avg_len)?,
        };
        Ok(Self { kmers })
    }

    pub fn kmers(&self) -> &[usize] {
        &self.kmers
    }

    pub fn largest(&self) -> usize {
        // Never empty: both constructors reject empty lists
        self.kmers.iter().copied().max().unwrap_or(MIN_K)
    }

    /// Middle element, for assemblers that take a single k.
    pub fn median(&self) -> usize {
        self.kmers[self.kmers.len() / 2]
    }

    /// Comma separated form, e.g. `31,51,71`.
    pub fn to_list(&self) -> String {
        self.kmers
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Validate a free-form user list such as `21,33,55` or `21 33 55`.
/// Order is kept as given.
pub fn parse_user_kmers(list: &str, avg_len: usize) -> Result<Vec<usize>> {
    let mut kmers = Vec::new();
    for token in list.split(|c: char| !c.is_ascii_digit()) {
        if token.is_empty() {
            continue;
        }
        let k: usize = token
            .parse()
            .map_err(|_| ShovillError::config(format!("invalid k-mer value '{token}'")))?;

        if k < SHORT_READ_MIN_K {
            return Err(ShovillError::config(format!(
                "k-mer {k} is below the minimum of {SHORT_READ_MIN_K}"
            )));
        }
        if k > MAX_K {
            return Err(ShovillError::config(format!(
                "k-mer {k} is above the maximum of {MAX_K}"
            )));
        }
        if k >= avg_len {
            return Err(ShovillError::config(format!(
                "k-mer {k} is not shorter than the average read length {avg_len}"
            )));
        }
        if k % 2 == 0 {
            return Err(ShovillError::config(format!("k-mer {k} must be odd")));
        }
        kmers.push(k);
    }

    if kmers.is_empty() {
        return Err(ShovillError::config(format!(
            "no k-mer values found in '{list}'"
        )));
    }
    Ok(kmers)
}

/// Spread up to `KMER_POINTS` odd k values between the minimum k and
/// three quarters of the average read length.
pub fn auto_kmers(avg_len: usize) -> Result<Vec<usize>> {
    let max_k = MAX_K.min((KMER_READ_FRAC * avg_len as f64).floor() as usize);
    let min_k = if avg_len < SHORT_READ_LEN {
        SHORT_READ_MIN_K
    } else {
        MIN_K
    };

    if max_k < min_k {
        return Err(ShovillError::config(format!(
            "read length too short for assembly (average {avg_len} bp)"
        )));
    }

    let mut step = MIN_KMER_STEP.max((max_k - min_k) / (KMER_POINTS - 1));
    // An even step keeps every value odd
    if step % 2 == 1 {
        step += 1;
    }

    let kmers: Vec<usize> = (min_k..=max_k).step_by(step).collect();
    log::debug!(
        "k-mer range {min_k}..{max_k} step {step} => {:?}",
        kmers
    );
    Ok(kmers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_kmers_typical_reads() {
        assert_eq!(auto_kmers(150).unwrap(), vec![31, 51, 71, 91, 111]);
        assert_eq!(auto_kmers(250).unwrap(), vec![31, 55, 79, 103, 127]);
    }

    #[test]
    fn test_auto_kmers_properties() {
        for avg_len in 75..=300 {
            let kmers = auto_kmers(avg_len).unwrap();
            let cap = MAX_K.min((0.75 * avg_len as f64).floor() as usize);
            assert!(!kmers.is_empty() && kmers.len() <= 5, "avg_len={avg_len}");
            assert!(kmers.windows(2).all(|w| w[0] < w[1]));
            for &k in &kmers {
                assert_eq!(k % 2, 1, "avg_len={avg_len} k={k}");
                assert!(k >= MIN_K && k <= cap, "avg_len={avg_len} k={k}");
            }
        }
    }

    #[test]
    fn test_short_reads_lower_min_k() {
        let kmers = auto_kmers(74).unwrap();
        assert_eq!(kmers[0], 21);
        assert_eq!(auto_kmers(40).unwrap(), vec![21, 27]);
        assert_eq!(auto_kmers(75).unwrap()[0], 31);
    }

    #[test]
    fn test_reads_too_short() {
        assert_eq!(auto_kmers(28).unwrap(), vec![21]);
        assert!(matches!(auto_kmers(27), Err(ShovillError::Config(_))));
    }

    #[test]
    fn test_user_kmers_pass_through() {
        let plan = KmerPlan::new(120, Some("21,33,55")).unwrap();
        assert_eq!(plan.kmers(), &[21, 33, 55]);
        assert_eq!(plan.to_list(), "21,33,55");

        let plan = KmerPlan::new(120, Some(" 55 ; 33,21 ")).unwrap();
        assert_eq!(plan.kmers(), &[55, 33, 21]);
        assert_eq!(plan.largest(), 55);
    }

    #[test]
    fn test_user_kmers_out_of_bounds() {
        assert!(matches!(parse_user_kmers("130", 150), Err(ShovillError::Config(_))));
        assert!(matches!(parse_user_kmers("20", 150), Err(ShovillError::Config(_))));
        assert!(matches!(parse_user_kmers("101", 101), Err(ShovillError::Config(_))));
        assert!(matches!(parse_user_kmers("32", 150), Err(ShovillError::Config(_))));
        assert!(parse_user_kmers(",,", 150).is_err());
    }

    #[test]
    fn test_median() {
        let plan = KmerPlan::new(150, None).unwrap();
        assert_eq!(plan.median(), 71);
        assert_eq!(plan.largest(), 111);
    }
}
