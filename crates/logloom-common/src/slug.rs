//! Library-id slugging and filesystem-safe encoding.
//!
//! Routing output becomes a library id via [`slugify`]; library ids become
//! on-disk file names via [`percent_encode`] so arbitrary ids (including `/`
//! or `.`) cannot escape the library root.

/// Turn an LM routing classification into a library id.
///
/// Lowercases, maps every non-alphanumeric run to a single `-`, and trims
/// leading/trailing dashes. An input with no alphanumeric characters yields
/// `"unknown"`.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// Percent-encode a library id for use as a file name.
///
/// Keeps ASCII alphanumerics plus `-`, `_` and `.` (but never a leading `.`);
/// everything else becomes `%XX` per byte.
pub fn percent_encode(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for (i, b) in id.bytes().enumerate() {
        let plain = b.is_ascii_alphanumeric()
            || b == b'-'
            || b == b'_'
            || (b == b'.' && i != 0);
        if plain {
            out.push(char::from(b));
        } else {
            out.push('%');
            out.push_str(&format!("{b:02X}"));
        }
    }
    out
}

/// Reverse [`percent_encode`]. Malformed escapes are kept verbatim.
pub fn percent_decode(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = bytes.get(i + 1..i + 3)
            && let Ok(s) = std::str::from_utf8(hex)
            && let Ok(v) = u8::from_str_radix(s, 16)
        {
            out.push(v);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_dashes() {
        assert_eq!(slugify("Nginx Access Log"), "nginx-access-log");
        assert_eq!(slugify("auth/sshd [prod]"), "auth-sshd-prod");
    }

    #[test]
    fn slugify_collapses_runs_and_trims() {
        assert_eq!(slugify("  --Weird__  name!! "), "weird-name");
    }

    #[test]
    fn slugify_empty_falls_back_to_unknown() {
        assert_eq!(slugify(""), "unknown");
        assert_eq!(slugify("!!!"), "unknown");
    }

    #[test]
    fn percent_encode_keeps_safe_chars() {
        assert_eq!(percent_encode("nginx-access.log_2"), "nginx-access.log_2");
    }

    #[test]
    fn percent_encode_escapes_separators() {
        assert_eq!(percent_encode("a/b"), "a%2Fb");
        assert_eq!(percent_encode(".hidden"), "%2Ehidden");
    }

    #[test]
    fn percent_round_trip() {
        for id in ["plain", "a/b c%d", ".dot", "ünïcode"] {
            assert_eq!(percent_decode(&percent_encode(id)), id);
        }
    }

    #[test]
    fn percent_decode_keeps_malformed_escapes() {
        assert_eq!(percent_decode("a%Zb"), "a%Zb");
        assert_eq!(percent_decode("trailing%"), "trailing%");
    }
}
