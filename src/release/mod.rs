use rand::rngs::OsRng;
use rand::seq::SliceRandom;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const VERSION_LEN: usize = 10;

/// A 10-character version token drawn from an OS-backed CSPRNG, not a timestamp or a
/// seeded PRNG, so concurrent deploys across hosts can't coincidentally collide.
pub fn generate_version() -> String {
    let mut rng = OsRng;
    (0..VERSION_LEN)
        .map(|_| *ALPHABET.choose(&mut rng).expect("alphabet is non-empty") as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_the_expected_length_and_alphabet() {
        let version = generate_version();
        assert_eq!(version.len(), VERSION_LEN);
        assert!(version.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn two_calls_are_extremely_unlikely_to_collide() {
        let a = generate_version();
        let b = generate_version();
        assert_ne!(a, b);
    }
}
