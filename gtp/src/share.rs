//! Additive secret sharing over Z/pZ (stateless).

use rand::{CryptoRng, RngCore};

use crate::field::{FieldConfig, FieldElement};

/// Split `secret` into `n` additive shares summing to it mod `p`.
///
/// Draws the first `n - 1` shares uniformly from `[0, p)` using `rng`
/// (the caller must supply a cryptographic-quality source; see the design
/// note on RNG weakness in the source this protocol is modeled on) and
/// sets the last share so the sum reconstructs `secret`.
pub fn split(
    secret: FieldElement,
    n: usize,
    field: &FieldConfig,
    rng: &mut (impl RngCore + CryptoRng),
) -> Vec<FieldElement> {
    assert!(n >= 1, "must split into at least one share");
    let secret = field.reduce(secret);

    let mut shares: Vec<FieldElement> = (0..n.saturating_sub(1))
        .map(|_| field.random_element(rng))
        .collect();

    let partial_sum = field.sum(shares.iter().copied());
    shares.push(field.sub(secret, partial_sum));
    shares
}

/// Reconstruct a secret from its additive shares.
pub fn reconstruct(shares: impl IntoIterator<Item = FieldElement>, field: &FieldConfig) -> FieldElement {
    field.sum(shares)
}
