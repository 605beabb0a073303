use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Compute a deterministic SHA-256 content hash for a placeholder template
/// and its example values.
///
/// Used as the compiled-template cache key for candidates that have not been
/// assigned a library id yet. `BTreeMap` iteration order makes the digest
/// independent of insertion order.
pub fn template_hash(placeholder_template: &str, example_values: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(placeholder_template.as_bytes());
    for (name, value) in example_values {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn examples(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn output_is_64_lowercase_hex_chars() {
        let hash = template_hash("User ⟪alice⟫ logged in", &examples(&[("v1", "alice")]));
        assert_eq!(hash.len(), 64);
        assert!(
            hash.chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()),
            "hash must be lowercase hex: {hash}"
        );
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let ex = examples(&[("v1", "alice"), ("v2", "14:30")]);
        assert_eq!(template_hash("t", &ex), template_hash("t", &ex));
    }

    #[test]
    fn different_templates_produce_different_hashes() {
        let ex = examples(&[("v1", "alice")]);
        assert_ne!(
            template_hash("User ⟪alice⟫ logged in", &ex),
            template_hash("User ⟪alice⟫ logged out", &ex)
        );
    }

    #[test]
    fn example_values_participate_in_hash() {
        assert_ne!(
            template_hash("t", &examples(&[("v1", "a")])),
            template_hash("t", &examples(&[("v1", "b")]))
        );
    }
}
