// Positional two-way split. Each half reveals part of the key; this is not threshold secret
// sharing and must stay byte-compatible with shares already in storage.

use crate::errors::CustodyError;
use zeroize::Zeroizing;

/// Split `secret` at `floor(len / 2)` characters.
///
/// For an odd length the second part is one character longer.
pub fn split(secret: &str) -> Result<(Zeroizing<String>, Zeroizing<String>), CustodyError> {
    if secret.is_empty() {
        return Err(CustodyError::invalid("secret must not be empty"));
    }
    let mid = secret.chars().count() / 2;
    let at = secret
        .char_indices()
        .nth(mid)
        .map_or(secret.len(), |(i, _)| i);
    let (a, b) = secret
        .split_at_checked(at)
        .ok_or_else(|| CustodyError::invalid("secret split point"))?;
    Ok((Zeroizing::new(a.to_owned()), Zeroizing::new(b.to_owned())))
}

/// Inverse of [`split`]; parts must be passed in their original order.
pub fn recombine(part_a: &str, part_b: &str) -> Zeroizing<String> {
    let mut out = Zeroizing::new(String::with_capacity(part_a.len() + part_b.len()));
    out.push_str(part_a);
    out.push_str(part_b);
    out
}
