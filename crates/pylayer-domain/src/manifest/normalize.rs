pub fn canonicalize_package_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['_', '.'], "-")
}

pub(crate) fn strip_wrapping_quotes(input: &str) -> &str {
    if input.len() >= 2 {
        let bytes = input.as_bytes();
        let first = bytes[0];
        let last = bytes[input.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &input[1..input.len() - 1];
        }
    }
    input
}

/// Split a requirement into the name token (with extras) and whatever follows it.
///
/// Whitespace between the name and its extras stays with the name token.
pub(crate) fn split_name(spec: &str) -> (&str, &str) {
    let mut end = spec.len();
    let mut in_extras = false;
    for (idx, ch) in spec.char_indices() {
        match ch {
            '[' => in_extras = true,
            ']' => in_extras = false,
            _ if in_extras => {}
            _ if ch.is_ascii_whitespace() && spec[idx..].trim_start().starts_with('[') => {}
            _ if ch.is_ascii_whitespace()
                || matches!(ch, '<' | '>' | '=' | '!' | '~' | ';' | '@') =>
            {
                end = idx;
                break;
            }
            _ => {}
        }
    }
    (&spec[..end], &spec[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_fold_case_and_separators() {
        assert_eq!(canonicalize_package_name("Zope.Interface"), "zope-interface");
        assert_eq!(canonicalize_package_name("typing_extensions"), "typing-extensions");
    }

    #[test]
    fn split_name_keeps_extras_with_the_name() {
        assert_eq!(
            split_name("requests[socks, security]>=2.0"),
            ("requests[socks, security]", ">=2.0")
        );
        assert_eq!(split_name("boto3 @ https://x/y.whl"), ("boto3", " @ https://x/y.whl"));
        assert_eq!(split_name("attrs"), ("attrs", ""));
        assert_eq!(
            split_name("requests [socks]==2.28.0"),
            ("requests [socks]", "==2.28.0")
        );
        assert_eq!(
            split_name("requests  [socks] ; python_version>'3'"),
            ("requests  [socks]", " ; python_version>'3'")
        );
    }

    #[test]
    fn strips_matching_quotes_only() {
        assert_eq!(strip_wrapping_quotes("\"requests\""), "requests");
        assert_eq!(strip_wrapping_quotes("'requests\""), "'requests\"");
    }
}
