//! Organization access codes.

use rand::Rng;

/// Uppercase letters and digits without the look-alikes I, O, 0 and 1
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of codes issued with the default configuration
pub const DEFAULT_LENGTH: usize = 6;

/// Generate a random access code
pub fn generate(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Canonical form of a submitted code
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Whether a normalized code could have been issued with `length`
pub fn is_well_formed(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| ALPHABET.contains(&b))
}
