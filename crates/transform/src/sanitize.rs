//! Dynamic-element stripping.
//!
//! Only markers that are meaningless (or harmful) on a static copy are
//! removed: per-session nonce fields and machine discovery links. Anything
//! broader has historically eaten real content.

use crate::consts::{API_LINK, NONCE_INPUT, OEMBED_JSON_LINK, OEMBED_XML_LINK, REFERER_INPUT};

pub fn strip_dynamic(html: &str) -> String {
    [&*NONCE_INPUT, &*REFERER_INPUT, &*API_LINK, &*OEMBED_JSON_LINK, &*OEMBED_XML_LINK]
        .iter()
        .fold(html.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"<form><input type="hidden" name="_wpnonce" value="abc123"></form>"#, "<form></form>")]
    #[case(r#"<form><INPUT type='hidden' name='_wp_http_referer' value='/contact/' /></form>"#, "<form></form>")]
    #[case(r#"<head><link rel="https://api.w.org/" href="/wp-json/"></head>"#, "<head></head>")]
    #[case(
        r#"<link rel="alternate" type="application/json+oembed" href="/wp-json/oembed/1.0/embed?url=x">"#,
        ""
    )]
    #[case(r#"<link rel="alternate" type="text/xml+oembed" href="/wp-json/oembed/1.0/embed?format=xml">"#, "")]
    fn test_strips(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_dynamic(input), expected);
    }

    #[rstest]
    #[case(r#"<input type="text" name="s" value="">"#)]
    #[case(r#"<link rel="stylesheet" href="/wp-content/themes/x/style.css">"#)]
    #[case(r#"<link rel="alternate" type="application/rss+xml" href="/feed/">"#)]
    #[case(r#"<script>var nonce = "_wpnonce";</script>"#)]
    fn test_leaves_everything_else(#[case] input: &str) {
        assert_eq!(strip_dynamic(input), input);
    }
}
