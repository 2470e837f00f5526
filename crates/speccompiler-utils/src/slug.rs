//! Title slugging for section labels and anchors

/// Turn a heading title into a stable lowercase slug.
///
/// ASCII alphanumerics are kept, everything else collapses to single
/// hyphens. Leading and trailing hyphens are trimmed.
#[must_use]
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_titles() {
        assert_eq!(slugify("System Overview"), "system-overview");
        assert_eq!(slugify("  Weird -- punctuation!! "), "weird-punctuation");
        assert_eq!(slugify("V2.1 Interface"), "v2-1-interface");
    }

    #[test]
    fn empty_and_symbol_only() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("---"), "");
    }
}
