//! XML node aggregation
//!
//! Collapses the flat open/text/close token stream of a package part into
//! node records: short flattened lists of the tags and text seen since the
//! last flush. Workbook parts are shallow enough that a record usually holds
//! exactly what one handler needs, e.g. `[sheetData, row, c, v, "42"]` for
//! the first cell of a sheet or `[c, f, "SUM(A1)"]` for a formula.

use crate::error::{Result, XlsxError};
use crate::options::ReaderOptions;
use indexmap::IndexMap;
use quick_xml::escape::{unescape, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::VecDeque;
use std::io::BufRead;

/// Element whose whole subtree is dropped (phonetic runs inside shared strings)
const IGNORED_SUBTREE: &str = "rPh";

/// Tag descriptor inside a node record
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    /// `None` when the element carries no attributes
    pub attributes: Option<IndexMap<String, String>>,
}

impl Tag {
    pub fn new(name: &str) -> Self {
        Tag {
            name: name.to_string(),
            attributes: None,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .as_ref()
            .and_then(|attrs| attrs.get(key))
            .map(String::as_str)
    }
}

/// One entry of a node record
#[derive(Debug, Clone, PartialEq)]
pub enum NodePart {
    Tag(Tag),
    Text(String),
}

impl NodePart {
    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            NodePart::Tag(tag) => Some(tag),
            NodePart::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodePart::Text(text) => Some(text),
            NodePart::Tag(_) => None,
        }
    }

    /// Element name, `None` for text
    pub fn name(&self) -> Option<&str> {
        self.as_tag().map(|tag| tag.name.as_str())
    }
}

/// Flattened run of tags and text, bounded by a matching open/close pair
pub type Node = Vec<NodePart>;

/// Low-level token fed into the aggregator
#[derive(Debug, Clone, PartialEq)]
pub enum XmlToken {
    /// Start tag; a self-closing element is followed by its own `Close`
    Open { tag: Tag, self_closing: bool },
    Text(String),
    Close(String),
}

/// Accumulation state between flushes
#[derive(Debug, Default)]
pub struct NodeAggregator {
    buffer: Node,
    pending_emit: bool,
    ignore_depth: usize,
}

impl NodeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one token, pushing any completed node record to `out`
    pub fn push(&mut self, token: XmlToken, out: &mut VecDeque<Node>) {
        match token {
            XmlToken::Open { tag, self_closing } => {
                if tag.name == IGNORED_SUBTREE {
                    self.ignore_depth += 1;
                    return;
                }
                if self.ignore_depth > 0 {
                    return;
                }
                if self_closing {
                    if !self.buffer.is_empty() {
                        out.push_back(std::mem::take(&mut self.buffer));
                    }
                    self.pending_emit = true;
                }
                self.buffer.push(NodePart::Tag(tag));
            }
            XmlToken::Text(text) => {
                if self.ignore_depth > 0 {
                    return;
                }
                self.buffer.push(NodePart::Text(text));
                self.pending_emit = true;
            }
            XmlToken::Close(name) => {
                if name == IGNORED_SUBTREE {
                    self.ignore_depth = self.ignore_depth.saturating_sub(1);
                    return;
                }
                if self.ignore_depth > 0 {
                    return;
                }

                if self.pending_emit {
                    out.push_back(std::mem::take(&mut self.buffer));
                    self.pending_emit = false;
                } else if self.buffer.last().and_then(NodePart::name) == Some(name.as_str()) {
                    // opened and closed with nothing inside
                    self.buffer.push(NodePart::Text(String::new()));
                    out.push_back(std::mem::take(&mut self.buffer));
                    self.pending_emit = false;
                }
                // closing a container whose children were already flushed
                self.buffer.pop();
            }
        }
    }

    /// Drop any partial record left at end of stream
    pub fn finish(&mut self) {
        self.buffer.clear();
        self.pending_emit = false;
        self.ignore_depth = 0;
    }
}

/// Pull-based node reader over one package part
pub struct XmlNodeReader<B: BufRead> {
    reader: Reader<B>,
    buf: Vec<u8>,
    aggregator: NodeAggregator,
    ready: VecDeque<Node>,
    options: ReaderOptions,
    part: String,
    done: bool,
}

impl<B: BufRead> XmlNodeReader<B> {
    pub fn new(source: B, part: &str, options: &ReaderOptions) -> Self {
        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.check_end_names = options.strict;
        config.expand_empty_elements = false;
        config.trim_text(false);

        XmlNodeReader {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            aggregator: NodeAggregator::new(),
            ready: VecDeque::new(),
            options: *options,
            part: part.to_string(),
            done: false,
        }
    }

    /// Name of the part being read, used in error messages
    pub fn part(&self) -> &str {
        &self.part
    }

    /// Next completed node record, `None` at end of the part
    ///
    /// A tokenizer error is returned once; the reader is finished afterwards.
    pub fn next_node(&mut self) -> Result<Option<Node>> {
        loop {
            if let Some(node) = self.ready.pop_front() {
                return Ok(Some(node));
            }
            if self.done {
                return Ok(None);
            }

            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => {
                    self.done = true;
                    self.aggregator.finish();
                    return Err(XlsxError::xml(&self.part, e));
                }
            };

            let result = match event {
                Event::Start(e) => read_tag(&e, &self.options).map(|tag| {
                    self.aggregator.push(
                        XmlToken::Open {
                            tag,
                            self_closing: false,
                        },
                        &mut self.ready,
                    );
                }),
                Event::Empty(e) => read_tag(&e, &self.options).map(|tag| {
                    let name = tag.name.clone();
                    self.aggregator.push(
                        XmlToken::Open {
                            tag,
                            self_closing: true,
                        },
                        &mut self.ready,
                    );
                    self.aggregator.push(XmlToken::Close(name), &mut self.ready);
                }),
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    self.aggregator.push(XmlToken::Close(name), &mut self.ready);
                    Ok(())
                }
                Event::Text(e) => {
                    let raw = String::from_utf8_lossy(&e).to_string();
                    unescape_text(&raw, &self.options).map(|text| {
                        if let Some(text) = shape_text(text, &self.options) {
                            self.aggregator.push(XmlToken::Text(text), &mut self.ready);
                        }
                    })
                }
                Event::CData(e) => {
                    let raw = String::from_utf8_lossy(&e).to_string();
                    if let Some(text) = shape_text(raw, &self.options) {
                        self.aggregator.push(XmlToken::Text(text), &mut self.ready);
                    }
                    Ok(())
                }
                Event::Eof => {
                    self.aggregator.finish();
                    self.done = true;
                    Ok(())
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                self.done = true;
                self.aggregator.finish();
                return Err(XlsxError::xml(&self.part, e));
            }
        }
    }
}

fn read_tag(start: &BytesStart<'_>, options: &ReaderOptions) -> quick_xml::Result<Tag> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();

    let mut attributes = IndexMap::new();
    for attr in start.attributes().with_checks(options.strict) {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let raw = String::from_utf8_lossy(&attr.value).to_string();
        attributes.insert(key, unescape_text(&raw, options)?);
    }

    Ok(Tag {
        name,
        attributes: (!attributes.is_empty()).then_some(attributes),
    })
}

fn unescape_text(raw: &str, options: &ReaderOptions) -> quick_xml::Result<String> {
    if options.strict_entities {
        return Ok(unescape(raw)?.into_owned());
    }

    // Lax mode knows a few HTML entities and keeps anything else verbatim
    Ok(match unescape_with(raw, html_entity) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.to_string(),
    })
}

fn html_entity(name: &str) -> Option<&'static str> {
    let resolved = match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        "nbsp" => "\u{a0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "euro" => "\u{20ac}",
        "hellip" => "\u{2026}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        _ => return None,
    };
    Some(resolved)
}

fn shape_text(text: String, options: &ReaderOptions) -> Option<String> {
    let text = if options.normalize {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        text
    };

    if options.trim {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.len() != text.len() {
            return Some(trimmed.to_string());
        }
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(xml: &str, options: ReaderOptions) -> Vec<Node> {
        let mut reader = XmlNodeReader::new(xml.as_bytes(), "test.xml", &options);
        let mut out = Vec::new();
        while let Some(node) = reader.next_node().unwrap() {
            out.push(node);
        }
        out
    }

    fn names(node: &Node) -> Vec<String> {
        node.iter()
            .map(|part| match part {
                NodePart::Tag(tag) => format!("<{}>", tag.name),
                NodePart::Text(text) => text.clone(),
            })
            .collect()
    }

    #[test]
    fn test_worksheet_records() {
        let xml = r#"<worksheet xmlns="x"><dimension ref="A1:B1"/><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><f>SUM(A1)</f><v>3</v></c></row></sheetData><pageMargins left="0.7"/></worksheet>"#;
        let records: Vec<Vec<String>> = nodes(xml, ReaderOptions::default())
            .iter()
            .map(names)
            .collect();

        assert_eq!(
            records,
            vec![
                vec!["<worksheet>"],
                vec!["<dimension>"],
                vec!["<sheetData>", "<row>", "<c>", "<v>", "0"],
                vec!["<c>", "<f>", "SUM(A1)"],
                vec!["<v>", "3"],
                vec!["<pageMargins>"],
            ]
        );
    }

    #[test]
    fn test_attributes_kept_and_omitted() {
        let all = nodes(
            r#"<a><b x="1" y="&amp;"/><c/></a>"#,
            ReaderOptions::default(),
        );
        let b = all[1][0].as_tag().unwrap();
        assert_eq!(b.attr("x"), Some("1"));
        assert_eq!(b.attr("y"), Some("&"));
        let c = all[2][0].as_tag().unwrap();
        assert!(c.attributes.is_none());
    }

    #[test]
    fn test_empty_element_gets_placeholder() {
        let all = nodes("<root><t></t></root>", ReaderOptions::default());
        assert_eq!(all.len(), 1);
        assert_eq!(names(&all[0]), vec!["<root>", "<t>", ""]);
    }

    #[test]
    fn test_phonetic_runs_suppressed() {
        let xml = r#"<sst><si><t>漢字</t><rPh sb="0" eb="2"><t>カンジ</t></rPh><phoneticPr fontId="1"/></si></sst>"#;
        let all = nodes(xml, ReaderOptions::default());
        assert_eq!(names(&all[0]), vec!["<sst>", "<si>", "<t>", "漢字"]);
        assert!(all
            .iter()
            .flatten()
            .all(|part| part.as_text() != Some("カンジ")));
    }

    #[test]
    fn test_trim_and_whitespace() {
        let xml = "<a> <b> x </b> </a>";
        let trimmed = nodes(xml, ReaderOptions::default());
        assert_eq!(names(&trimmed[0]), vec!["<a>", "<b>", "x"]);

        // untrimmed whitespace is text, so nothing flushes until </b>
        let raw = nodes(xml, ReaderOptions::default().with_trim(false));
        assert_eq!(names(&raw[0]), vec!["<a>", " ", "<b>", " x "]);
        assert_eq!(names(&raw[1]), vec![" "]);
    }

    #[test]
    fn test_normalize_collapses_runs() {
        let options = ReaderOptions::default().with_normalize(true);
        let all = nodes("<t>a \n\t b</t>", options);
        assert_eq!(names(&all[0]), vec!["<t>", "a b"]);
    }

    #[test]
    fn test_entity_strictness() {
        let xml = "<t>a&nbsp;b</t>";
        let mut strict = XmlNodeReader::new(xml.as_bytes(), "s.xml", &ReaderOptions::default());
        assert!(matches!(strict.next_node(), Err(XlsxError::Xml { .. })));

        let lax = nodes(xml, ReaderOptions::default().with_strict_entities(false));
        assert_eq!(names(&lax[0]), vec!["<t>", "a\u{a0}b"]);
    }

    #[test]
    fn test_mismatched_end_is_error_once() {
        let mut reader =
            XmlNodeReader::new("<a><b>x</a>".as_bytes(), "bad.xml", &ReaderOptions::default());
        let mut errors = 0;
        loop {
            match reader.next_node() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    errors += 1;
                    assert!(e.to_string().contains("bad.xml"));
                }
            }
        }
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_aggregator_direct() {
        let mut agg = NodeAggregator::new();
        let mut out = VecDeque::new();
        agg.push(
            XmlToken::Open {
                tag: Tag::new("cols"),
                self_closing: false,
            },
            &mut out,
        );
        agg.push(
            XmlToken::Open {
                tag: Tag::new("col"),
                self_closing: true,
            },
            &mut out,
        );
        agg.push(XmlToken::Close("col".to_string()), &mut out);
        agg.push(XmlToken::Close("cols".to_string()), &mut out);

        let flushed: Vec<Vec<String>> = out.iter().map(names).collect();
        assert_eq!(flushed, vec![vec!["<cols>"], vec!["<col>"]]);
    }
}
