//! Presentation Document - Id-Addressable HTML
//!
//! The engine never renders HTML. It only needs to find elements by their
//! `id` attribute and splice markup in and around them, so the document is
//! kept as source text and elements are located by a tag scan.

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Byte offsets of one element inside the document source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ElementSpan {
    start: usize,
    content_start: usize,
    content_end: usize,
    end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlDocument {
    source: String,
}

impl HtmlDocument {
    pub fn parse(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }

    pub fn html(&self) -> &str {
        &self.source
    }

    pub fn contains_id(&self, id: &str) -> bool {
        find_element(&self.source, id).is_some()
    }

    pub fn inner_html(&self, id: &str) -> Option<&str> {
        find_element(&self.source, id).map(|span| &self.source[span.content_start..span.content_end])
    }

    pub fn outer_html(&self, id: &str) -> Option<&str> {
        find_element(&self.source, id).map(|span| &self.source[span.start..span.end])
    }

    /// Returns `false` when no element carries `id`.
    pub fn set_inner_html(&mut self, id: &str, html: &str) -> bool {
        match find_element(&self.source, id) {
            Some(span) => {
                self.source.replace_range(span.content_start..span.content_end, html);
                true
            }
            None => false,
        }
    }

    pub fn append_child(&mut self, id: &str, html: &str) -> bool {
        match find_element(&self.source, id) {
            Some(span) => {
                self.source.insert_str(span.content_end, html);
                true
            }
            None => false,
        }
    }

    pub fn insert_after(&mut self, id: &str, html: &str) -> bool {
        match find_element(&self.source, id) {
            Some(span) => {
                self.source.insert_str(span.end, html);
                true
            }
            None => false,
        }
    }

    pub fn insert_before(&mut self, id: &str, html: &str) -> bool {
        match find_element(&self.source, id) {
            Some(span) => {
                self.source.insert_str(span.start, html);
                true
            }
            None => false,
        }
    }

    /// Removes the element and returns its outer HTML.
    pub fn remove(&mut self, id: &str) -> Option<String> {
        let span = find_element(&self.source, id)?;
        let removed = self.source[span.start..span.end].to_string();
        self.source.replace_range(span.start..span.end, "");
        Some(removed)
    }

    /// Appends `html` at the end of `<head>`; a document without a head gets
    /// it prepended instead.
    pub fn append_to_head(&mut self, html: &str) {
        let lower = self.source.to_ascii_lowercase();
        match lower.find("</head") {
            Some(position) => self.source.insert_str(position, html),
            None => self.source.insert_str(0, html),
        }
    }

    pub fn head_contains(&self, html: &str) -> bool {
        let lower = self.source.to_ascii_lowercase();
        let end = lower.find("</head").unwrap_or(0);
        self.source[..end].contains(html)
    }
}

/// `id` of the first element in `fragment`, if it has one.
pub fn first_element_id(fragment: &str) -> Option<String> {
    let mut cursor = 0usize;
    while let Some(rel) = fragment[cursor..].find('<') {
        let start = cursor + rel;
        let rest = &fragment[start + 1..];
        if rest.starts_with("!--") {
            cursor = skip_comment(fragment, start);
            continue;
        }
        if rest.starts_with('/') || rest.starts_with('!') || rest.starts_with('?') {
            cursor = start + 1;
            continue;
        }
        let tag_end = find_tag_end(fragment, start)?;
        let inner = &fragment[start + 1..tag_end];
        if tag_name(inner).is_empty() {
            cursor = start + 1;
            continue;
        }
        return attr_value(inner, "id");
    }
    None
}

fn find_element(source: &str, id: &str) -> Option<ElementSpan> {
    let mut cursor = 0usize;
    while let Some(rel) = source[cursor..].find('<') {
        let start = cursor + rel;
        let rest = &source[start + 1..];

        if rest.starts_with("!--") {
            cursor = skip_comment(source, start);
            continue;
        }
        if rest.starts_with('/') || rest.starts_with('!') || rest.starts_with('?') {
            cursor = start + 1;
            continue;
        }

        let tag_end = find_tag_end(source, start)?;
        let inner = &source[start + 1..tag_end];
        let name = tag_name(inner);
        if name.is_empty() {
            cursor = start + 1;
            continue;
        }

        let content_start = tag_end + 1;
        let self_closing = inner.trim_end().ends_with('/') || VOID_ELEMENTS.contains(&name.as_str());

        if attr_value(inner, "id").as_deref() == Some(id) {
            if self_closing {
                return Some(ElementSpan {
                    start,
                    content_start,
                    content_end: content_start,
                    end: content_start,
                });
            }
            let (content_end, end) = find_matching_close(source, content_start, &name)?;
            return Some(ElementSpan { start, content_start, content_end, end });
        }

        cursor = content_start;
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing {
            // Script and style bodies are not markup
            if let Some((_, end)) = find_matching_close(source, content_start, &name) {
                cursor = end;
            }
        }
    }
    None
}

/// Position after the `-->` closing the comment opened at `start`.
fn skip_comment(source: &str, start: usize) -> usize {
    match source[start..].find("-->") {
        Some(rel) => start + rel + 3,
        None => source.len(),
    }
}

/// Index of the `>` closing the tag opened at `start`, quotes respected.
fn find_tag_end(source: &str, start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, ch) in source[start..].char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '>' => return Some(start + offset),
            None => {}
        }
    }
    None
}

fn tag_name(inner: &str) -> String {
    inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

fn attr_value(inner: &str, key: &str) -> Option<String> {
    let name_len = inner
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(inner.len());
    let mut rest = &inner[name_len..];

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if rest.is_empty() {
            return None;
        }

        let attr_end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let attr_name = &rest[..attr_end];
        rest = rest[attr_end..].trim_start();

        if !rest.starts_with('=') {
            if attr_name.is_empty() {
                return None;
            }
            continue;
        }
        rest = rest[1..].trim_start();

        let value = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let body = &rest[1..];
                let close = body.find(quote).unwrap_or(body.len());
                let value = &body[..close];
                rest = body.get(close + 1..).unwrap_or("");
                value
            }
            Some(_) => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                let value = &rest[..end];
                rest = &rest[end..];
                value
            }
            None => "",
        };

        if attr_name.eq_ignore_ascii_case(key) {
            return Some(value.to_string());
        }
    }
}

/// Finds the close tag balancing an element named `name` whose content
/// starts at `from`. Returns `(close_tag_start, close_tag_end)`.
fn find_matching_close(source: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let lower = source.to_ascii_lowercase();
    let open = format!("<{}", name);
    let close = format!("</{}", name);
    let raw = RAW_TEXT_ELEMENTS.contains(&name);

    let mut depth = 1usize;
    let mut cursor = from;
    while let Some(rel) = lower[cursor..].find('<') {
        let position = cursor + rel;
        let rest = &lower[position..];

        if !raw && rest.starts_with("<!--") {
            cursor = skip_comment(source, position);
            continue;
        }

        if rest.starts_with(&close) && is_name_boundary(rest, close.len()) {
            let tag_end = find_tag_end(source, position)?;
            depth -= 1;
            if depth == 0 {
                return Some((position, tag_end + 1));
            }
            cursor = tag_end + 1;
            continue;
        }

        if !raw && rest.starts_with(&open) && is_name_boundary(rest, open.len()) {
            let tag_end = find_tag_end(source, position)?;
            if !source[position + 1..tag_end].trim_end().ends_with('/') {
                depth += 1;
            }
            cursor = tag_end + 1;
            continue;
        }

        cursor = position + 1;
    }
    None
}

fn is_name_boundary(rest: &str, at: usize) -> bool {
    match rest[at..].chars().next() {
        Some(c) => c.is_whitespace() || c == '>' || c == '/',
        None => false,
    }
}
