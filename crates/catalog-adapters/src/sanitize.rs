//! HTML sanitization policies for upstream text fields.

use scraper::{ElementRef, Html, Node};

const RICH_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "dd", "dl", "dt", "em", "h1", "h2", "h3", "h4", "h5",
    "h6", "hr", "i", "li", "ol", "p", "pre", "s", "small", "strong", "sub", "sup", "u", "ul",
];

const VOID_TAGS: &[&str] = &["br", "hr"];

/// Elements removed together with everything inside them.
const DROPPED_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template",
];

const LINK_SCHEMES: &[&str] = &["http:", "https:", "mailto:"];

/// Two fixed policies: a permissive one for long descriptions and a strict one
/// for titles and names. Stateless; build once and share.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rich_tags: &'static [&'static str],
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            rich_tags: RICH_TAGS,
        }
    }

    /// Keeps a safe subset of markup. Malformed input degrades to text.
    pub fn sanitize_rich(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }
        let fragment = Html::parse_fragment(html);
        let mut out = String::with_capacity(html.len());
        self.write_children(fragment.root_element(), &mut out);
        out
    }

    /// Removes all markup and decodes entities, e.g. `"<b>A</b> &amp; B"` -> `"A & B"`.
    pub fn strip_tags(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }
        let fragment = Html::parse_fragment(html);
        let mut out = String::with_capacity(html.len());
        collect_text(fragment.root_element(), &mut out);
        out
    }

    fn write_children(&self, element: ElementRef<'_>, out: &mut String) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => push_escaped(out, text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.write_element(child, out);
                    }
                }
                _ => {}
            }
        }
    }

    fn write_element(&self, element: ElementRef<'_>, out: &mut String) {
        let name = element.value().name();
        if DROPPED_TAGS.contains(&name) {
            return;
        }
        if !self.rich_tags.contains(&name) {
            self.write_children(element, out);
            return;
        }

        out.push('<');
        out.push_str(name);
        if name == "a" {
            self.write_link_attrs(element, out);
        }
        out.push('>');
        if VOID_TAGS.contains(&name) {
            return;
        }
        self.write_children(element, out);
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }

    fn write_link_attrs(&self, element: ElementRef<'_>, out: &mut String) {
        let el = element.value();
        if let Some(href) = el.attr("href").map(str::trim) {
            let lower = href.to_ascii_lowercase();
            if LINK_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
                out.push_str(" href=\"");
                push_escaped(out, href);
                out.push_str("\" rel=\"nofollow\"");
            }
        }
        if let Some(title) = el.attr("title") {
            out.push_str(" title=\"");
            push_escaped(out, title);
            out.push('"');
        }
    }
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if DROPPED_TAGS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(ch),
        }
    }
}
