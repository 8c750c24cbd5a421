//! Subdomain Entropy
//!
//! Shannon entropy (bits) over the 36-symbol alphanumeric alphabet. The
//! frequency table lives in a caller-owned `EntropyScratch` that one detector
//! invocation reuses for every query, so scoring a name never allocates.

/// a-z + 0-9, case-folded
pub const ALPHABET_SIZE: usize = 36;

pub struct EntropyScratch {
    counts: [u32; ALPHABET_SIZE],
}

impl EntropyScratch {
    pub fn new() -> Self {
        Self { counts: [0; ALPHABET_SIZE] }
    }

    /// Entropy of the alphanumeric symbols in `text`; other bytes are skipped.
    /// Returns (bits, symbol count).
    pub fn shannon_bits(&mut self, text: &str) -> (f64, usize) {
        self.counts = [0; ALPHABET_SIZE];
        let mut total = 0usize;

        for byte in text.bytes() {
            let slot = match byte {
                b'a'..=b'z' => (byte - b'a') as usize,
                b'A'..=b'Z' => (byte - b'A') as usize,
                b'0'..=b'9' => 26 + (byte - b'0') as usize,
                _ => continue,
            };
            self.counts[slot] += 1;
            total += 1;
        }

        if total == 0 {
            return (0.0, 0);
        }

        let n = total as f64;
        let bits = self
            .counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.log2()
            })
            .sum::<f64>();
        (bits, total)
    }
}

impl Default for EntropyScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Labels left of the registered domain ("a.b.example.com" -> "a.b")
///
/// Names with two labels or fewer have no subdomain.
pub fn subdomain_portion(qname: &str) -> &str {
    let name = qname.trim().trim_end_matches('.');
    let mut dots = name.rmatch_indices('.');
    let _tld = dots.next();
    match dots.next() {
        Some((pos, _)) => &name[..pos],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_alphabet_hits_maximum() {
        let mut scratch = EntropyScratch::new();
        let (bits, symbols) = scratch.shannon_bits("abcdefghijklmnopqrstuvwxyz0123456789");
        assert_eq!(symbols, 36);
        assert!((bits - (36f64).log2()).abs() < 1e-9);
    }

    #[test]
    fn test_repetitive_text_is_low_entropy() {
        let mut scratch = EntropyScratch::new();
        let (bits, _) = scratch.shannon_bits("aaaaaaaaaaaaaaaa");
        assert_eq!(bits, 0.0);

        let (bits, _) = scratch.shannon_bits("mail");
        assert!(bits <= 2.0);
    }

    #[test]
    fn test_scratch_is_reset_between_calls() {
        let mut scratch = EntropyScratch::new();
        let first = scratch.shannon_bits("AbC-123.xyz");
        let second = scratch.shannon_bits("abc123xyz");
        assert_eq!(first, second);
        assert_eq!(scratch.shannon_bits("...---"), (0.0, 0));
    }

    #[test]
    fn test_subdomain_portion() {
        assert_eq!(subdomain_portion("a1b2.c3d4.example.com"), "a1b2.c3d4");
        assert_eq!(subdomain_portion("www.example.com."), "www");
        assert_eq!(subdomain_portion("example.com"), "");
        assert_eq!(subdomain_portion("localhost"), "");
        assert_eq!(subdomain_portion(""), "");
    }
}
