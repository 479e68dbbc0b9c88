//! Structural fingerprint of an HTML document.

use scraper::{ElementRef, Html};
use std::collections::{BTreeMap, BTreeSet};

/// The resources and meta tags a page is built from.
///
/// All collections are order-irrelevant; two documents that reference the
/// same URLs in a different order produce equal fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    pub scripts: BTreeSet<String>,
    pub styles: BTreeSet<String>,
    pub images: BTreeSet<String>,
    /// Meta `name` (or `property`) to `content`. Keys are lowercased.
    pub meta: BTreeMap<String, String>,
}

impl Fingerprint {
    /// Extract a fingerprint from an HTML body.
    ///
    /// Parsing is best-effort: malformed markup yields whatever elements the
    /// HTML5 tree builder recovers, and anything else yields an empty
    /// fingerprint. The document is walked once.
    pub fn extract(html: &str) -> Self {
        let document = Html::parse_document(html);
        let mut fp = Self::default();

        for el in document.root_element().descendants().filter_map(ElementRef::wrap) {
            match el.value().name() {
                "script" => fp.scripts.extend(attr_value(&el, "src")),
                "img" => fp.images.extend(attr_value(&el, "src")),
                "link" if is_stylesheet(&el) => fp.styles.extend(attr_value(&el, "href")),
                "meta" => {
                    let Some(content) = el.value().attr("content") else {
                        continue;
                    };
                    let key = attr_value(&el, "name").or_else(|| attr_value(&el, "property"));
                    if let Some(key) = key {
                        fp.meta.insert(key.to_ascii_lowercase(), content.trim().to_string());
                    }
                }
                _ => {}
            }
        }

        fp
    }
}

/// Trimmed attribute value, skipping empty ones.
fn attr_value(el: &ElementRef<'_>, attr: &str) -> Option<String> {
    el.value()
        .attr(attr)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_stylesheet(el: &ElementRef<'_>) -> bool {
    el.value()
        .attr("rel")
        .map(|rel| {
            rel.split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        })
        .unwrap_or(false)
}
