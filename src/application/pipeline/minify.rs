use bytes::Bytes;
use tracing::warn;

use super::classify::ContentKind;

/// CSS and JavaScript minifier. Never fails: on any problem the input is
/// returned unchanged.
#[derive(Debug, Clone, Copy)]
pub struct Minifier {
    enabled: bool,
}

impl Minifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn minify(&self, kind: ContentKind, body: Bytes) -> Bytes {
        if !self.enabled || !matches!(kind, ContentKind::Css | ContentKind::JavaScript) {
            return body;
        }

        let Ok(source) = std::str::from_utf8(&body) else {
            warn!(kind = ?kind, "Skipping minification of non UTF-8 source");
            return body;
        };

        let minified = match kind {
            ContentKind::Css => match minifier::css::minify(source) {
                Ok(minified) => minified.to_string(),
                Err(reason) => {
                    warn!(error = reason, "CSS minification failed; serving original");
                    return body;
                }
            },
            ContentKind::JavaScript => minifier::js::minify(source).to_string(),
            ContentKind::RasterImage(_) | ContentKind::Other => return body,
        };

        if minified.is_empty() && !source.trim().is_empty() {
            warn!(kind = ?kind, "Minifier produced empty output; serving original");
            return body;
        }
        Bytes::from(minified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_whitespace_is_removed() {
        let minifier = Minifier::new(true);
        let out = minifier.minify(
            ContentKind::Css,
            Bytes::from_static(b"body {\n  color: red;\n}\n"),
        );
        let out = std::str::from_utf8(&out).expect("utf8");
        assert!(out.len() < "body {\n  color: red;\n}\n".len());
        assert!(out.contains("color:red"));
    }

    #[test]
    fn javascript_is_minified() {
        let minifier = Minifier::new(true);
        let source = b"function add(a, b) {\n    // sum\n    return a + b;\n}\n";
        let out = minifier.minify(ContentKind::JavaScript, Bytes::from_static(source));
        assert!(out.len() < source.len());
        assert!(!std::str::from_utf8(&out).expect("utf8").contains("// sum"));
    }

    #[test]
    fn invalid_utf8_and_other_kinds_pass_through() {
        let minifier = Minifier::new(true);
        let binary = Bytes::from_static(&[0xff, 0xfe, b'{', b'}']);
        assert_eq!(minifier.minify(ContentKind::Css, binary.clone()), binary);

        let html = Bytes::from_static(b"<p>  spaced  </p>");
        assert_eq!(minifier.minify(ContentKind::Other, html.clone()), html);
    }

    #[test]
    fn disabled_minifier_is_identity() {
        let minifier = Minifier::new(false);
        let css = Bytes::from_static(b"body {  color: red;  }");
        assert_eq!(minifier.minify(ContentKind::Css, css.clone()), css);
    }
}
