// src/utils/html.rs

use std::collections::HashSet;

/// Strips every tag from text that arrives from outside the system
/// (OCR output, form fields) before it is stored.
///
/// Unlike `ammonia::clean`, no tag survives: names and titles never need markup.
/// The result is plain text, so the entities ammonia emits are decoded again
/// (`"A & B"` is stored as typed, not as `A &amp; B`).
pub fn strip_tags(input: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder.tags(HashSet::new());
    let cleaned = builder.clean(input).to_string();
    decode_entities(&cleaned).trim().to_string()
}

/// Inverse of the escaping done by the HTML serializer for text nodes.
/// `&amp;` goes last so `&amp;lt;` decodes to `&lt;`, not `<`.
fn decode_entities(escaped: &str) -> String {
    escaped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

/// Sanitizes an optional field, collapsing an empty result to `None`.
pub fn clean_optional(input: Option<&str>) -> Option<String> {
    input.map(strip_tags).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_script_and_markup() {
        assert_eq!(strip_tags("<b>Asha</b> <script>alert(1)</script>K"), "Asha K");
    }

    #[test]
    fn plain_text_is_kept_verbatim() {
        assert_eq!(strip_tags("A & B"), "A & B");
        assert_eq!(strip_tags("Maths & Physics"), "Maths & Physics");
        assert_eq!(strip_tags("a < b"), "a < b");
        assert_eq!(strip_tags("O'Neil \"Jr\""), "O'Neil \"Jr\"");
    }

    #[test]
    fn literal_entity_text_is_not_double_decoded() {
        // The input text "&lt;" arrives as "&amp;lt;".
        assert_eq!(strip_tags("&amp;lt;"), "&lt;");
    }

    #[test]
    fn blank_optional_becomes_none() {
        assert_eq!(clean_optional(Some("  <i></i> ")), None);
        assert_eq!(clean_optional(Some(" Ravi ")), Some("Ravi".to_string()));
        assert_eq!(clean_optional(None), None);
    }
}
