//! Lookups of Open Graph / Twitter Card `<meta>` tags and other page level
//! markup. Empty values count as missing.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

/// Content of the first `<meta property="...">`.
pub(crate) fn meta_property<'a>(document: &'a Html, property: &str) -> Option<&'a str> {
    meta_contents(document, "property", property).into_iter().next()
}

/// Contents of every `<meta property="...">`, in document order.
pub(crate) fn meta_properties<'a>(document: &'a Html, property: &str) -> Vec<&'a str> {
    meta_contents(document, "property", property)
}

/// Content of the first `<meta name="...">`.
pub(crate) fn meta_name<'a>(document: &'a Html, name: &str) -> Option<&'a str> {
    meta_contents(document, "name", name).into_iter().next()
}

fn meta_contents<'a>(document: &'a Html, attribute: &str, value: &str) -> Vec<&'a str> {
    let Ok(selector) = Selector::parse(&format!(r#"meta[{}="{}"]"#, attribute, value)) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| non_empty(element.value().attr("content")))
        .collect()
}

/// Text of the `<title>` element with whitespace collapsed.
pub(crate) fn page_title(document: &Html) -> Option<String> {
    static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

    document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|title| collapse_whitespace(&title.text().collect::<String>()))
        .filter(|title| !title.is_empty())
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
