//! Workbook-level metadata gathered from the package's auxiliary parts
//!
//! Sheet names, relationships, shared strings and styles arrive as separate
//! members in whatever order the producer wrote them. Each one is folded into
//! [`WorkbookMetadata`] node by node; worksheets only become decodable once
//! the parts they depend on have been read.

use crate::error::Result;
use crate::format::{builtin_format_code, DateSystem};
use crate::options::ReaderOptions;
use crate::xml::{Node, NodePart, Tag, XmlNodeReader};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};

/// Metadata member of the package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataPart {
    Workbook,
    Relationships,
    SharedStrings,
    Styles,
}

impl MetadataPart {
    /// Classify a member path, `None` for anything that is not metadata
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "xl/workbook.xml" => Some(MetadataPart::Workbook),
            "xl/_rels/workbook.xml.rels" => Some(MetadataPart::Relationships),
            "xl/sharedStrings.xml" => Some(MetadataPart::SharedStrings),
            "xl/styles.xml" => Some(MetadataPart::Styles),
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            MetadataPart::Workbook => "xl/workbook.xml",
            MetadataPart::Relationships => "xl/_rels/workbook.xml.rels",
            MetadataPart::SharedStrings => "xl/sharedStrings.xml",
            MetadataPart::Styles => "xl/styles.xml",
        }
    }
}

/// Everything a worksheet needs to resolve its cells
#[derive(Debug, Default)]
pub struct WorkbookMetadata {
    /// Relationship id → sheet name, in declaration order
    sheet_names: IndexMap<String, String>,
    /// Normalized relationship target → relationship id
    relationships: HashMap<String, String>,
    shared_strings: Vec<String>,
    /// Every tag seen in styles.xml, in document order
    style_tags: Vec<Tag>,
    /// numFmtId → custom format code
    format_codes: HashMap<u32, String>,
    /// `xf` records of `cellXfs`, indexed by a cell's `s` attribute
    cell_xfs: Vec<Tag>,
    date_system: DateSystem,

    workbook_parsed: bool,
    relationships_parsed: bool,
    shared_strings_parsed: bool,
    styles_parsed: bool,
}

impl WorkbookMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one metadata part to its end
    ///
    /// Returns `Ok(false)` when the abort flag interrupted reading; the part is
    /// not marked as parsed in that case.
    pub fn parse_part<B: BufRead>(
        &mut self,
        part: MetadataPart,
        source: B,
        options: &ReaderOptions,
        abort: &AtomicBool,
    ) -> Result<bool> {
        let mut reader = XmlNodeReader::new(source, part.path(), options);

        while let Some(node) = reader.next_node()? {
            if abort.load(Ordering::Relaxed) {
                return Ok(false);
            }
            self.apply_node(part, node);
        }

        self.finish_part(part);
        Ok(true)
    }

    /// Fold one node record of `part` into the store
    pub fn apply_node(&mut self, part: MetadataPart, node: Node) {
        match part {
            MetadataPart::Workbook => self.apply_workbook_node(&node),
            MetadataPart::Relationships => self.apply_relationships_node(&node),
            MetadataPart::SharedStrings => self.apply_shared_strings_node(node),
            MetadataPart::Styles => self.apply_styles_node(node),
        }
    }

    /// Mark a part as fully read, deriving any computed tables
    pub fn finish_part(&mut self, part: MetadataPart) {
        match part {
            MetadataPart::Workbook => self.workbook_parsed = true,
            MetadataPart::Relationships => self.relationships_parsed = true,
            MetadataPart::SharedStrings => self.shared_strings_parsed = true,
            MetadataPart::Styles => {
                self.derive_cell_xfs();
                self.styles_parsed = true;
            }
        }
    }

    fn apply_workbook_node(&mut self, node: &Node) {
        for tag in node.iter().filter_map(NodePart::as_tag) {
            match tag.name.as_str() {
                "sheet" => {
                    if let (Some(id), Some(name)) = (tag.attr("r:id"), tag.attr("name")) {
                        self.sheet_names.insert(id.to_string(), name.to_string());
                    }
                }
                "workbookPr" => {
                    if matches!(tag.attr("date1904"), Some("1") | Some("true")) {
                        self.date_system = DateSystem::V1904;
                    }
                }
                _ => {}
            }
        }
    }

    fn apply_relationships_node(&mut self, node: &Node) {
        for tag in node.iter().filter_map(NodePart::as_tag) {
            if tag.name != "Relationship" {
                continue;
            }
            if let (Some(target), Some(id)) = (tag.attr("Target"), tag.attr("Id")) {
                self.relationships
                    .insert(normalize_target(target).to_string(), id.to_string());
            }
        }
    }

    // A record containing `si` starts a new item; later records of the same
    // item are further rich-text runs appended to it.
    fn apply_shared_strings_node(&mut self, mut node: Node) {
        let starts_item = node.iter().any(|part| part.name() == Some("si"));

        let value = node.pop();
        let is_text_run = node.pop().and_then(|part| part.name().map(|n| n == "t")) == Some(true);
        let text = match value {
            Some(NodePart::Text(text)) => text,
            _ => String::new(),
        };

        if starts_item {
            self.shared_strings
                .push(if is_text_run { text } else { String::new() });
        } else if is_text_run {
            if let Some(last) = self.shared_strings.last_mut() {
                last.push_str(&text);
            }
        }
    }

    fn apply_styles_node(&mut self, node: Node) {
        for part in node {
            if let NodePart::Tag(tag) = part {
                if tag.name == "numFmt" {
                    let id = tag.attr("numFmtId").and_then(|id| id.parse().ok());
                    if let (Some(id), Some(code)) = (id, tag.attr("formatCode")) {
                        self.format_codes.insert(id, code.to_string());
                    }
                }
                self.style_tags.push(tag);
            }
        }
    }

    fn derive_cell_xfs(&mut self) {
        let start = self
            .style_tags
            .iter()
            .position(|tag| tag.name == "cellXfs")
            .map(|i| i + 1)
            .unwrap_or(self.style_tags.len());

        self.cell_xfs = self.style_tags[start..]
            .iter()
            .filter(|tag| tag.name == "xf")
            .cloned()
            .collect();
    }

    /// Whether all the parts a worksheet depends on have been read
    ///
    /// Styles only matter when numeric formatting is enabled.
    pub fn is_ready(&self, formatting: bool) -> bool {
        self.workbook_parsed
            && self.relationships_parsed
            && self.shared_strings_parsed
            && (!formatting || self.styles_parsed)
    }

    pub fn is_parsed(&self, part: MetadataPart) -> bool {
        match part {
            MetadataPart::Workbook => self.workbook_parsed,
            MetadataPart::Relationships => self.relationships_parsed,
            MetadataPart::SharedStrings => self.shared_strings_parsed,
            MetadataPart::Styles => self.styles_parsed,
        }
    }

    /// Display name of a worksheet member
    ///
    /// Accepts the member path with or without the `xl/` prefix.
    pub fn sheet_name(&self, sheet_path: &str) -> Option<&str> {
        let id = self.relationships.get(normalize_target(sheet_path))?;
        self.sheet_names.get(id).map(String::as_str)
    }

    /// Sheet names in workbook declaration order
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheet_names.values().map(String::as_str).collect()
    }

    pub fn shared_string(&self, index: usize) -> Option<&str> {
        self.shared_strings.get(index).map(String::as_str)
    }

    pub fn shared_string_count(&self) -> usize {
        self.shared_strings.len()
    }

    /// numFmtId referenced by a cell style index
    pub fn number_format_id(&self, style_index: usize) -> Option<u32> {
        self.cell_xfs
            .get(style_index)?
            .attr("numFmtId")?
            .parse()
            .ok()
    }

    /// Format code for a numFmtId: custom definitions first, then built-ins
    pub fn format_code(&self, num_fmt_id: u32) -> Option<&str> {
        self.format_codes
            .get(&num_fmt_id)
            .map(String::as_str)
            .or_else(|| builtin_format_code(num_fmt_id))
    }

    pub fn date_system(&self) -> DateSystem {
        self.date_system
    }

    pub fn is_date1904(&self) -> bool {
        self.date_system == DateSystem::V1904
    }
}

/// `/xl/worksheets/sheet1.xml`, `xl/worksheets/sheet1.xml` and
/// `worksheets/sheet1.xml` all name the same member
fn normalize_target(target: &str) -> &str {
    let target = target.trim_start_matches('/');
    target.strip_prefix("xl/").unwrap_or(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(meta: &mut WorkbookMetadata, part: MetadataPart, xml: &str) {
        let abort = AtomicBool::new(false);
        let done = meta
            .parse_part(part, xml.as_bytes(), &ReaderOptions::default(), &abort)
            .unwrap();
        assert!(done);
    }

    #[test]
    fn test_sheet_names_through_relationships() {
        let mut meta = WorkbookMetadata::new();
        parse(
            &mut meta,
            MetadataPart::Workbook,
            r#"<workbook xmlns:r="r"><workbookPr date1904="1"/><sheets><sheet name="Data" sheetId="1" r:id="rId1"/><sheet name="Summary" sheetId="2" r:id="rId2"/></sheets></workbook>"#,
        );
        parse(
            &mut meta,
            MetadataPart::Relationships,
            r#"<Relationships><Relationship Id="rId2" Type="ws" Target="/xl/worksheets/sheet2.xml"/><Relationship Id="rId1" Type="ws" Target="worksheets/sheet1.xml"/></Relationships>"#,
        );

        assert_eq!(meta.sheet_name("worksheets/sheet1.xml"), Some("Data"));
        assert_eq!(meta.sheet_name("xl/worksheets/sheet2.xml"), Some("Summary"));
        assert_eq!(meta.sheet_name("worksheets/sheet9.xml"), None);
        assert_eq!(meta.sheet_names(), vec!["Data", "Summary"]);
        assert!(meta.is_date1904());
        assert!(!meta.is_ready(false));
    }

    #[test]
    fn test_shared_strings_rich_text_runs() {
        let mut meta = WorkbookMetadata::new();
        parse(
            &mut meta,
            MetadataPart::SharedStrings,
            r#"<sst count="4" uniqueCount="4"><si><t>plain</t></si><si><r><rPr><b/><sz val="11"/></rPr><t>bold</t></r><r><t xml:space="preserve"> tail</t></r></si><si><t/></si><si><r><t>a</t></r><r><t>b</t></r><r><t>c</t></r></si></sst>"#,
        );

        assert_eq!(meta.shared_string_count(), 4);
        assert_eq!(meta.shared_string(0), Some("plain"));
        // trimming applies per run
        assert_eq!(meta.shared_string(1), Some("boldtail"));
        assert_eq!(meta.shared_string(2), Some(""));
        assert_eq!(meta.shared_string(3), Some("abc"));
        assert_eq!(meta.shared_string(4), None);
    }

    #[test]
    fn test_shared_strings_untrimmed() {
        let mut meta = WorkbookMetadata::new();
        let abort = AtomicBool::new(false);
        meta.parse_part(
            MetadataPart::SharedStrings,
            r#"<sst><si><r><t>bold</t></r><r><t xml:space="preserve"> tail</t></r></si></sst>"#
                .as_bytes(),
            &ReaderOptions::default().with_trim(false),
            &abort,
        )
        .unwrap();
        assert_eq!(meta.shared_string(0), Some("bold tail"));
    }

    #[test]
    fn test_styles_cell_xfs_after_marker() {
        let mut meta = WorkbookMetadata::new();
        parse(
            &mut meta,
            MetadataPart::Styles,
            r#"<styleSheet><numFmts count="1"><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/></numFmts><cellStyleXfs count="1"><xf numFmtId="99"/></cellStyleXfs><cellXfs count="3"><xf numFmtId="0"/><xf numFmtId="164" applyNumberFormat="1"/><xf numFmtId="14"/></cellXfs></styleSheet>"#,
        );

        assert_eq!(meta.number_format_id(0), Some(0));
        assert_eq!(meta.number_format_id(1), Some(164));
        assert_eq!(meta.number_format_id(2), Some(14));
        assert_eq!(meta.number_format_id(3), None);
        assert_eq!(meta.format_code(164), Some("dd/mm/yyyy"));
        assert_eq!(meta.format_code(14), Some("m/d/yy"));
        assert_eq!(meta.format_code(0), Some("General"));
        assert!(meta.is_parsed(MetadataPart::Styles));
    }

    #[test]
    fn test_readiness() {
        let mut meta = WorkbookMetadata::new();
        meta.finish_part(MetadataPart::Workbook);
        meta.finish_part(MetadataPart::Relationships);
        meta.finish_part(MetadataPart::SharedStrings);
        assert!(meta.is_ready(false));
        assert!(!meta.is_ready(true));
        meta.finish_part(MetadataPart::Styles);
        assert!(meta.is_ready(true));
    }

    #[test]
    fn test_malformed_part_is_error() {
        let mut meta = WorkbookMetadata::new();
        let abort = AtomicBool::new(false);
        let result = meta.parse_part(
            MetadataPart::SharedStrings,
            "<sst><si><t>x</si></sst>".as_bytes(),
            &ReaderOptions::default(),
            &abort,
        );
        assert!(result.is_err());
        assert!(!meta.is_parsed(MetadataPart::SharedStrings));
    }

    #[test]
    fn test_abort_stops_parsing() {
        let mut meta = WorkbookMetadata::new();
        let abort = AtomicBool::new(true);
        let done = meta
            .parse_part(
                MetadataPart::SharedStrings,
                "<sst><si><t>x</t></si></sst>".as_bytes(),
                &ReaderOptions::default(),
                &abort,
            )
            .unwrap();
        assert!(!done);
        assert_eq!(meta.shared_string_count(), 0);
    }

    #[test]
    fn test_part_paths() {
        assert_eq!(
            MetadataPart::from_path("xl/sharedStrings.xml"),
            Some(MetadataPart::SharedStrings)
        );
        assert_eq!(MetadataPart::from_path("_rels/.rels"), None);
        assert_eq!(MetadataPart::Styles.path(), "xl/styles.xml");
    }
}
