//! Meta tag extraction from fetched HTML
//!
//! Pulls the `<title>` and the Open Graph / Twitter / article / description
//! `<meta>` tags out of a page. The result is stored with the short link so
//! the public landing page can re-emit them for link-preview crawlers.

use scraper::{ElementRef, Html, Selector};

use crate::model::MetaTag;

const SELECTOR: &str = "head title, meta";

/// Namespaces of `property`/`name` values worth keeping, compared case-insensitively
const META_PREFIXES: [&str; 3] = ["og:", "twitter:", "article:"];

/// Parses `html` into TITLE/META entries, in document order
///
/// Uses html5ever's error-recovering parser so malformed input never fails;
/// at worst nothing matches. `<title>` text comes back with entities decoded.
/// No deduplication is done.
pub fn parse_meta_from_html(html: &str) -> Vec<MetaTag> {
    let Ok(selector) = Selector::parse(SELECTOR) else {
        return Vec::new();
    };

    Html::parse_document(html)
        .select(&selector)
        .filter_map(|element| match element.value().name() {
            "title" => title_tag(element),
            "meta" => meta_tag(element),
            _ => None,
        })
        .collect()
}

/// Cheap plausibility check run before parsing a fetched body
///
/// Bodies that are empty or carry no markup at all are skipped entirely.
pub fn looks_like_html(body: &str) -> bool {
    let body = body.trim_start();
    !body.is_empty() && body.contains('<') && body.contains('>')
}

fn title_tag(element: ElementRef<'_>) -> Option<MetaTag> {
    let raw_text: String = element.text().collect();
    if raw_text.is_empty() {
        return None;
    }
    Some(MetaTag::Title { raw_text })
}

fn meta_tag(element: ElementRef<'_>) -> Option<MetaTag> {
    let attrs = element.value();
    let content = attrs.attr("content").filter(|content| !content.is_empty())?;
    let property = attrs.attr("property");
    let name = attrs.attr("name");

    if !(property.is_some_and(is_relevant) || name.is_some_and(is_relevant)) {
        return None;
    }

    Some(MetaTag::Meta {
        content: content.to_string(),
        property: property.map(str::to_string),
        name: name.map(str::to_string),
    })
}

/// `description` exactly, or one of [`META_PREFIXES`] as a prefix
fn is_relevant(value: &str) -> bool {
    if value.eq_ignore_ascii_case("description") {
        return true;
    }
    META_PREFIXES.iter().any(|prefix| {
        value
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}
