//! Facet extraction for the Parse Stage.
//!
//! Turns raw HTML into a [`FacetSet`]: document title, meta description,
//! body text with markup stripped and whitespace collapsed, and the
//! outbound links in document order. Pure string-in, facets-out; the
//! Parse Stage in `pagewatch-pipeline` owns versioning and persistence.

use std::sync::LazyLock;

use pagewatch_shared::{FacetSet, PageLink, PageWatchError, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));
static DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).expect("meta selector"));
static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("body selector"));
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("a selector"));

/// Elements whose text content is never page content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript"];

/// Extract the facet set from raw HTML, resolving links against `base_url`.
pub fn extract_facets(html: &str, base_url: &str) -> Result<FacetSet> {
    let base = Url::parse(base_url)
        .map_err(|e| PageWatchError::parse(format!("invalid base url {base_url}: {e}")))?;

    let doc = Html::parse_document(html);

    let title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let description = doc
        .select(&DESCRIPTION_SEL)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let text = doc
        .select(&BODY_SEL)
        .next()
        .map(|body| visible_text(body))
        .unwrap_or_default();

    let links = extract_links(&doc, &base);

    Ok(FacetSet {
        title,
        description,
        text,
        links,
    })
}

/// Collect text content, skipping script/style/noscript subtrees and
/// collapsing all whitespace runs to single spaces.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(root, &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            scraper::Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            scraper::Node::Element(element) => {
                if SKIPPED_ELEMENTS.contains(&element.name()) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// All `<a>` elements in document order as (resolved href, trimmed text).
///
/// Anchor-only, `javascript:` and `mailto:` targets resolve to an empty
/// href; the scoring side excludes empty hrefs, so they carry no weight
/// but preserve document order for the stored facet set.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<PageLink> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let text = el.text().collect::<String>().trim().to_string();
        let href = match el.value().attr("href") {
            Some(href)
                if !href.starts_with('#')
                    && !href.starts_with("javascript:")
                    && !href.starts_with("mailto:") =>
            {
                match base_url.join(href) {
                    Ok(mut resolved) => {
                        resolved.set_fragment(None);
                        resolved.to_string()
                    }
                    Err(_) => String::new(),
                }
            }
            _ => String::new(),
        };
        links.push(PageLink { href, text });
    }

    links
}
