//! HTML tokenization and fragment parsing.
//!
//! Small forgiving scanner, good enough for document construction and for
//! replaying `document.write` output: elements with attributes, text,
//! raw-text handling for `script`/`style`, comment and doctype skipping.
//! Not a spec-grade tree builder; mis-nested tags degrade to "pop until
//! a matching open tag is found".

use dk_dom::Document;
use dk_dom::NodeId;

/// Parsed fragment node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<FragmentNode>,
    },
    Text(String),
}

/// Ordered top-level nodes of a parsed snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub children: Vec<FragmentNode>,
}

/// Parses raw HTML into fragments or directly into a DOM.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn parse_fragment(&self, input: &str) -> Fragment {
        let mut builder = TreeBuilder::default();
        scan(input, &mut builder);
        builder.finish()
    }

    /// Parses `input` and appends the resulting nodes under `parent`.
    /// Returns the inserted top-level node ids in order.
    pub fn parse_into(&self, doc: &mut Document, parent: NodeId, input: &str) -> Vec<NodeId> {
        let fragment = self.parse_fragment(input);
        fragment
            .children
            .iter()
            .map(|child| materialize(doc, parent, child))
            .collect()
    }
}

fn materialize(doc: &mut Document, parent: NodeId, node: &FragmentNode) -> NodeId {
    match node {
        FragmentNode::Text(text) => {
            let id = doc.create_text(text);
            doc.append_child(parent, id);
            id
        }
        FragmentNode::Element {
            tag,
            attrs,
            children,
        } => {
            let id = doc.create_element(tag);
            for (name, value) in attrs {
                doc.set_attribute(id, name, value);
            }
            doc.append_child(parent, id);
            for child in children {
                materialize(doc, id, child);
            }
            id
        }
    }
}

#[derive(Debug, Default)]
struct TreeBuilder {
    roots: Vec<FragmentNode>,
    // Stack of open elements; children accumulate in place.
    stack: Vec<FragmentNode>,
}

impl TreeBuilder {
    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.attach(FragmentNode::Text(text.to_owned()));
    }

    fn open(&mut self, tag: String, attrs: Vec<(String, String)>) {
        self.stack.push(FragmentNode::Element {
            tag,
            attrs,
            children: Vec::new(),
        });
    }

    fn leaf(&mut self, tag: String, attrs: Vec<(String, String)>) {
        self.attach(FragmentNode::Element {
            tag,
            attrs,
            children: Vec::new(),
        });
    }

    fn close(&mut self, tag: &str) {
        let Some(position) = self.stack.iter().rposition(|open| {
            matches!(open, FragmentNode::Element { tag: open_tag, .. } if open_tag == tag)
        }) else {
            return;
        };
        // Implicitly close anything opened after the matching tag.
        while self.stack.len() > position {
            if let Some(done) = self.stack.pop() {
                self.attach(done);
            }
        }
    }

    fn attach(&mut self, node: FragmentNode) {
        match self.stack.last_mut() {
            Some(FragmentNode::Element { children, .. }) => children.push(node),
            _ => self.roots.push(node),
        }
    }

    fn finish(mut self) -> Fragment {
        while let Some(done) = self.stack.pop() {
            self.attach(done);
        }
        Fragment {
            children: self.roots,
        }
    }
}

fn scan(input: &str, builder: &mut TreeBuilder) {
    let bytes = input.as_bytes();
    let mut idx = 0_usize;

    while idx < bytes.len() {
        if bytes[idx] != b'<' {
            let next = find_byte(bytes, idx, b'<').unwrap_or(bytes.len());
            builder.text(&input[idx..next]);
            idx = next;
            continue;
        }

        if starts_with(bytes, idx, b"<!--") {
            idx = skip_comment(bytes, idx);
            continue;
        }

        if starts_with(bytes, idx, b"<!") {
            idx = skip_to_gt(bytes, idx.saturating_add(2));
            continue;
        }

        if starts_with(bytes, idx, b"<?") {
            idx = skip_processing_instruction(bytes, idx);
            continue;
        }

        let Some((tag, next_idx)) = parse_tag(input, idx) else {
            // Stray '<' becomes text up to the next tag opener.
            let next = find_byte(bytes, idx.saturating_add(1), b'<').unwrap_or(bytes.len());
            builder.text(&input[idx..next]);
            idx = next;
            continue;
        };

        if tag.is_end {
            builder.close(&tag.name);
            idx = next_idx;
            continue;
        }

        if !tag.self_closing && is_raw_text_tag(&tag.name) {
            let (raw, after_raw) = read_raw_text_until_end_tag(input, next_idx, &tag.name);
            let name = tag.name.clone();
            builder.open(tag.name, tag.attrs);
            builder.text(raw);
            builder.close(&name);
            idx = after_raw;
            continue;
        }

        if tag.self_closing || is_void_tag(&tag.name) {
            builder.leaf(tag.name, tag.attrs);
        } else {
            builder.open(tag.name, tag.attrs);
        }
        idx = next_idx;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    attrs: Vec<(String, String)>,
    is_end: bool,
    self_closing: bool,
}

fn parse_tag(input: &str, start: usize) -> Option<(ParsedTag, usize)> {
    let bytes = input.as_bytes();
    if bytes.get(start).copied() != Some(b'<') {
        return None;
    }

    let mut idx = start.saturating_add(1);
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx = idx.saturating_add(1);
    }

    idx = skip_spaces(bytes, idx);
    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if idx == name_start {
        return None;
    }
    let name = input[name_start..idx].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut self_closing = false;
    loop {
        idx = skip_spaces(bytes, idx);
        match bytes.get(idx).copied() {
            None => return None,
            Some(b'>') => {
                return Some((
                    ParsedTag {
                        name,
                        attrs,
                        is_end,
                        self_closing,
                    },
                    idx.saturating_add(1),
                ));
            }
            Some(b'/') => {
                self_closing = true;
                idx = idx.saturating_add(1);
            }
            Some(_) => {
                let Some((attr, next_idx)) = parse_attribute(input, idx) else {
                    idx = idx.saturating_add(1);
                    continue;
                };
                attrs.push(attr);
                idx = next_idx;
            }
        }
    }
}

fn parse_attribute(input: &str, start: usize) -> Option<((String, String), usize)> {
    let bytes = input.as_bytes();
    let mut idx = start;
    let name_start = idx;
    while idx < bytes.len() && is_attr_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if idx == name_start {
        return None;
    }
    let name = input[name_start..idx].to_ascii_lowercase();

    let after_name = skip_spaces(bytes, idx);
    if bytes.get(after_name).copied() != Some(b'=') {
        // Boolean attribute.
        return Some(((name, String::new()), idx));
    }

    idx = skip_spaces(bytes, after_name.saturating_add(1));
    match bytes.get(idx).copied() {
        Some(quote @ (b'"' | b'\'')) => {
            let value_start = idx.saturating_add(1);
            let value_end = find_byte(bytes, value_start, quote).unwrap_or(bytes.len());
            let value = input[value_start..value_end.min(input.len())].to_owned();
            Some(((name, value), value_end.saturating_add(1).min(bytes.len())))
        }
        _ => {
            let value_start = idx;
            while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>' {
                idx = idx.saturating_add(1);
            }
            Some(((name, input[value_start..idx].to_owned()), idx))
        }
    }
}

fn read_raw_text_until_end_tag<'a>(
    input: &'a str,
    start: usize,
    tag_name: &str,
) -> (&'a str, usize) {
    let bytes = input.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while idx < bytes.len() {
        if bytes[idx] == b'<'
            && bytes.get(idx.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, idx.saturating_add(2), tag_bytes)
            && tag_name_boundary(bytes, idx.saturating_add(2 + tag_bytes.len()))
        {
            if let Some((_, end_idx)) = parse_tag(input, idx) {
                return (&input[start..idx], end_idx);
            }
        }
        idx = idx.saturating_add(1);
    }

    (&input[start..], bytes.len())
}

fn is_raw_text_tag(name: &str) -> bool {
    matches!(name, "script" | "style" | "title" | "textarea")
}

fn is_void_tag(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    find_subslice(bytes, start.saturating_add(4), b"-->")
        .map(|end| end.saturating_add(3))
        .unwrap_or(bytes.len())
}

fn skip_processing_instruction(bytes: &[u8], start: usize) -> usize {
    if let Some(end) = find_subslice(bytes, start.saturating_add(2), b"?>") {
        return end.saturating_add(2);
    }
    skip_to_gt(bytes, start.saturating_add(2))
}

fn skip_to_gt(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        if bytes[idx] == b'>' {
            return idx.saturating_add(1);
        }
        idx = idx.saturating_add(1);
    }
    bytes.len()
}

fn tag_name_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_attr_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':' | b'.')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }
    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::FragmentNode;
    use super::HtmlParser;
    use dk_dom::Document;

    fn element(fragment: &super::Fragment, index: usize) -> Option<(&str, usize)> {
        match fragment.children.get(index) {
            Some(FragmentNode::Element { tag, children, .. }) => {
                Some((tag.as_str(), children.len()))
            }
            _ => None,
        }
    }

    #[test]
    fn parses_nested_elements_with_attributes() {
        let parser = HtmlParser;
        let fragment =
            parser.parse_fragment("<div id=\"outer\" class='a'><span data-x>text</span></div>");
        assert_eq!(element(&fragment, 0), Some(("div", 1)));
        let Some(FragmentNode::Element { attrs, .. }) = fragment.children.first() else {
            panic!("expected element");
        };
        assert_eq!(
            attrs,
            &vec![
                ("id".to_owned(), "outer".to_owned()),
                ("class".to_owned(), "a".to_owned()),
            ]
        );
    }

    #[test]
    fn script_bodies_are_raw_text() {
        let parser = HtmlParser;
        let fragment =
            parser.parse_fragment("<script type='text/psajs'>if (a < b) { f(); }</script>");
        let Some(FragmentNode::Element { tag, children, .. }) = fragment.children.first() else {
            panic!("expected element");
        };
        assert_eq!(tag, "script");
        assert_eq!(
            children.first(),
            Some(&FragmentNode::Text("if (a < b) { f(); }".to_owned()))
        );
    }

    #[test]
    fn void_and_self_closing_tags_do_not_nest() {
        let parser = HtmlParser;
        let fragment = parser.parse_fragment("<img src=x><br/><p>tail</p>");
        assert_eq!(element(&fragment, 0), Some(("img", 0)));
        assert_eq!(element(&fragment, 1), Some(("br", 0)));
        assert_eq!(element(&fragment, 2), Some(("p", 1)));
    }

    #[test]
    fn unclosed_tags_close_at_end_of_input() {
        let parser = HtmlParser;
        let fragment = parser.parse_fragment("<div><p>dangling");
        assert_eq!(element(&fragment, 0), Some(("div", 1)));
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        let parser = HtmlParser;
        let fragment = parser.parse_fragment("</div><p>ok</p>");
        assert_eq!(element(&fragment, 0), Some(("p", 1)));
    }

    #[test]
    fn comments_and_doctype_are_skipped() {
        let parser = HtmlParser;
        let fragment = parser.parse_fragment("<!doctype html><!-- note --><b>x</b>");
        assert_eq!(element(&fragment, 0), Some(("b", 1)));
        assert_eq!(fragment.children.len(), 1);
    }

    #[test]
    fn parse_into_materializes_under_parent() {
        let parser = HtmlParser;
        let mut doc = Document::new();
        let body = doc.create_element("body");
        doc.append_child(doc.root(), body);
        let inserted = parser.parse_into(&mut doc, body, "<div id='a'>hi</div><span></span>");
        assert_eq!(inserted.len(), 2);
        assert_eq!(doc.get_element_by_id("a"), inserted.first().copied());
        assert_eq!(doc.text_content(body), "hi");
    }
}
