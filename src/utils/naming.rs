//! Identifier helpers for names that end up in generated configuration.

/// Replace every character that is not ASCII alphanumeric or `_` with `_`.
///
/// BIRD protocol names and compose service names both accept this subset.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
