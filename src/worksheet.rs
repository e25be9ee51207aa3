//! Worksheet decoding
//!
//! A [`Worksheet`] is handed out by the workbook reader for every sheet
//! member. Nothing is read until the consumer calls [`Worksheet::process`],
//! which returns a [`Rows`] iterator of [`SheetEvent`]s, or
//! [`Worksheet::skip`], which discards the member.
//!
//! ```no_run
//! use xlsxstream::{Event, SheetEvent, WorkbookReader};
//!
//! let mut reader = WorkbookReader::open("report.xlsx")?;
//! while let Some(event) = reader.next_event()? {
//!     if let Event::Worksheet(sheet) = event {
//!         if sheet.name() != Some("Data") {
//!             sheet.skip()?;
//!             continue;
//!         }
//!         for event in sheet.process() {
//!             match event? {
//!                 SheetEvent::Row(row) => println!("{:?}", row.to_strings()),
//!                 SheetEvent::End(end) => println!("{} rows", end.row_count),
//!             }
//!         }
//!     }
//! }
//! # Ok::<(), xlsxstream::XlsxError>(())
//! ```

use crate::column::{parse_cell_reference, MAX_COLUMN};
use crate::error::Result;
use crate::format::{format_number, is_date_format, is_general};
use crate::metadata::WorkbookMetadata;
use crate::options::ReaderOptions;
use crate::types::{CellValue, Row};
use crate::xml::{Node, NodePart, XmlNodeReader};
use indexmap::IndexMap;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Event produced while decoding one worksheet
#[derive(Debug, Clone, PartialEq)]
pub enum SheetEvent {
    /// A completed row, emitted in document order
    Row(Row),
    /// Terminal event; always the last one of a worksheet
    End(SheetEnd),
}

/// Summary carried by the terminal worksheet event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SheetEnd {
    /// Number of rows started, equal to the number of row events
    pub row_count: u32,
}

/// Sheet number of a worksheet member path (`xl/worksheets/sheet3.xml` → 3)
pub fn sheet_number(path: &str) -> Option<u32> {
    path.strip_prefix("xl/worksheets/sheet")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// A worksheet member awaiting a decision from the consumer
///
/// Dropping it without calling [`process`](Self::process) or
/// [`skip`](Self::skip) discards the member like `skip` does.
pub struct Worksheet<'a> {
    id: u32,
    path: String,
    name: Option<String>,
    deferred: bool,
    source: Box<dyn BufRead + 'a>,
    metadata: &'a WorkbookMetadata,
    options: ReaderOptions,
    abort: Arc<AtomicBool>,
    spool: Option<NamedTempFile>,
}

impl<'a> Worksheet<'a> {
    pub(crate) fn new(
        path: &str,
        source: Box<dyn BufRead + 'a>,
        metadata: &'a WorkbookMetadata,
        options: ReaderOptions,
        abort: Arc<AtomicBool>,
    ) -> Self {
        let name = metadata.sheet_name(path).map(str::to_string);
        if name.is_none() {
            log::warn!("no sheet name found for '{}'", path);
        }

        Worksheet {
            id: sheet_number(path).unwrap_or(0),
            path: path.to_string(),
            name,
            deferred: false,
            source,
            metadata,
            options,
            abort,
            spool: None,
        }
    }

    /// Attach the spool file backing a replayed worksheet; it is deleted
    /// together with the worksheet or its row iterator
    pub(crate) fn with_spool(mut self, spool: NamedTempFile) -> Self {
        self.deferred = true;
        self.spool = Some(spool);
        self
    }

    /// Sheet number taken from the member path
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Display name from the workbook, if the relationships resolve it
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Member path inside the package
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this worksheet was spooled and replayed after the container ended
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Start decoding rows
    pub fn process(self) -> Rows<'a> {
        log::debug!("processing worksheet '{}'", self.path);

        let part = self.path.clone();
        Rows {
            id: self.id,
            name: self.name,
            nodes: XmlNodeReader::new(self.source, &part, &self.options),
            decoder: SheetDecoder::new(self.metadata, self.options),
            abort: self.abort,
            aborted: false,
            state: RowsState::Decoding,
            _spool: self.spool,
        }
    }

    /// Discard the worksheet without decoding it
    ///
    /// Returns the terminal event with a row count of zero.
    pub fn skip(mut self) -> Result<SheetEnd> {
        log::debug!("skipping worksheet '{}'", self.path);
        if self.spool.is_none() {
            // surfaces container errors while the member is still current
            io::copy(&mut self.source, &mut io::sink())?;
        }
        Ok(SheetEnd::default())
    }
}

impl std::fmt::Debug for Worksheet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worksheet")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("deferred", &self.deferred)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowsState {
    Decoding,
    /// Last row was flushed; the end event is next
    EndPending,
    Done,
}

/// Iterator over the events of one worksheet
///
/// Yields every row, then [`SheetEvent::End`]. An XML error in the
/// worksheet is yielded once and ends the iterator.
pub struct Rows<'a> {
    id: u32,
    name: Option<String>,
    nodes: XmlNodeReader<Box<dyn BufRead + 'a>>,
    decoder: SheetDecoder<'a>,
    abort: Arc<AtomicBool>,
    aborted: bool,
    state: RowsState,
    _spool: Option<NamedTempFile>,
}

impl<'a> Rows<'a> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stop this worksheet; no further events are produced
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Rows started so far
    pub fn row_count(&self) -> u32 {
        self.decoder.row_count()
    }

    /// Attribute maps of the `<col>` definitions seen so far
    pub fn columns(&self) -> &[IndexMap<String, String>] {
        self.decoder.columns()
    }

    /// Non-row nodes (`dimension`, `sheetViews`, `pageMargins`, ...) by element name
    pub fn header_nodes(&self) -> &IndexMap<String, Vec<Node>> {
        self.decoder.header_nodes()
    }

    /// Value of the `<dimension ref>` attribute, e.g. `A1:D20`
    pub fn dimension(&self) -> Option<&str> {
        self.decoder
            .header_nodes()
            .get("dimension")?
            .first()?
            .first()?
            .as_tag()?
            .attr("ref")
    }

    fn halted(&self) -> bool {
        self.aborted || self.abort.load(Ordering::Relaxed)
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<SheetEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == RowsState::Done {
            return None;
        }
        if self.halted() {
            self.state = RowsState::Done;
            return None;
        }

        if self.state == RowsState::EndPending {
            self.state = RowsState::Done;
            return Some(Ok(SheetEvent::End(self.decoder.end())));
        }

        loop {
            match self.nodes.next_node() {
                Ok(Some(node)) => {
                    if let Some(row) = self.decoder.push_node(node) {
                        return Some(Ok(SheetEvent::Row(row)));
                    }
                    if self.halted() {
                        self.state = RowsState::Done;
                        return None;
                    }
                }
                Ok(None) => {
                    return match self.decoder.finish() {
                        Some(row) => {
                            self.state = RowsState::EndPending;
                            Some(Ok(SheetEvent::Row(row)))
                        }
                        None => {
                            self.state = RowsState::Done;
                            Some(Ok(SheetEvent::End(self.decoder.end())))
                        }
                    };
                }
                Err(e) => {
                    log::debug!("worksheet {} failed: {}", self.id, e);
                    self.state = RowsState::Done;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Cell whose value may still arrive in a later record
#[derive(Debug, Clone)]
struct CellContext {
    column: u32,
    cell_type: Option<String>,
    style: Option<usize>,
}

/// Row assembly state machine over worksheet node records
///
/// Outside `sheetData` records are kept as header nodes; inside it each
/// record either starts a row, describes a cell, or carries the value of
/// the most recent cell.
pub struct SheetDecoder<'m> {
    metadata: &'m WorkbookMetadata,
    options: ReaderOptions,
    in_rows: bool,
    working_row: Option<Row>,
    current_cell: Option<CellContext>,
    last_column: u32,
    last_row_number: u32,
    row_count: u32,
    columns: Vec<IndexMap<String, String>>,
    header_nodes: IndexMap<String, Vec<Node>>,
}

impl<'m> SheetDecoder<'m> {
    pub fn new(metadata: &'m WorkbookMetadata, options: ReaderOptions) -> Self {
        SheetDecoder {
            metadata,
            options,
            in_rows: false,
            working_row: None,
            current_cell: None,
            last_column: 0,
            last_row_number: 0,
            row_count: 0,
            columns: Vec::new(),
            header_nodes: IndexMap::new(),
        }
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn columns(&self) -> &[IndexMap<String, String>] {
        &self.columns
    }

    pub fn header_nodes(&self) -> &IndexMap<String, Vec<Node>> {
        &self.header_nodes
    }

    /// Apply one record; returns the previous row when this record completed it
    pub fn push_node(&mut self, mut node: Node) -> Option<Row> {
        strip_layout_whitespace(&mut node);
        // the root tag shares a record with sheetData when nothing precedes it
        if node.first().and_then(NodePart::name) == Some("worksheet") {
            node.remove(0);
        }

        let first = node.first().and_then(NodePart::name).map(str::to_string);
        let mut completed = None;

        match first.as_deref() {
            Some("sheetPr") | Some("pageSetUpPr") | Some("cols") => {
                return None;
            }
            Some("col") => {
                if let Some(NodePart::Tag(tag)) = node.into_iter().next() {
                    self.columns.push(tag.attributes.unwrap_or_default());
                }
                return None;
            }
            Some("printOptions") | Some("pageMargins") | Some("pageSetup") => {
                self.in_rows = false;
                completed = self.take_row();
            }
            Some("sheetData") | Some("row") => {
                if first.as_deref() == Some("sheetData") {
                    self.in_rows = true;
                    node.remove(0);
                }
                completed = self.take_row();

                if node.first().and_then(NodePart::name) == Some("row") {
                    if let NodePart::Tag(tag) = node.remove(0) {
                        self.start_row(tag.attributes.unwrap_or_default());
                    }
                }
            }
            _ => {}
        }

        if self.in_rows {
            self.apply_cell_node(node);
        } else if let Some(name) = first {
            self.header_nodes.entry(name).or_default().push(node);
        }

        completed
    }

    /// End of stream: leave row mode and hand back the pending row
    pub fn finish(&mut self) -> Option<Row> {
        self.in_rows = false;
        self.take_row()
    }

    pub fn end(&self) -> SheetEnd {
        SheetEnd {
            row_count: self.row_count,
        }
    }

    fn start_row(&mut self, attributes: IndexMap<String, String>) {
        self.row_count += 1;
        let number = attributes
            .get("r")
            .and_then(|r| r.parse().ok())
            .unwrap_or(self.last_row_number.saturating_add(1));
        self.last_row_number = number;

        let mut row = Row::new(number);
        row.attributes = attributes;
        self.working_row = Some(row);
        self.current_cell = None;
        self.last_column = 0;
    }

    fn take_row(&mut self) -> Option<Row> {
        let row = self.working_row.take()?;
        log::trace!("row {} complete with {} cells", row.number, row.len());
        Some(row)
    }

    fn apply_cell_node(&mut self, node: Node) {
        let mut parts = node.into_iter();
        let Some(NodePart::Tag(head)) = parts.next() else {
            return;
        };

        match head.name.as_str() {
            "c" => {
                let column = head
                    .attr("r")
                    .and_then(parse_cell_reference)
                    .map(|(column, _)| column)
                    .unwrap_or(self.last_column.saturating_add(1));
                if column > MAX_COLUMN {
                    log::debug!("ignoring cell past column {}", MAX_COLUMN);
                    self.current_cell = None;
                    return;
                }
                self.last_column = column;

                let cell = CellContext {
                    column,
                    cell_type: head.attr("t").map(str::to_string),
                    style: head.attr("s").and_then(|s| s.parse().ok()),
                };
                self.current_cell = Some(cell.clone());

                let child = parts.next();
                let rest: Vec<NodePart> = parts.collect();
                let text = rest.first().and_then(NodePart::as_text).unwrap_or("");

                match child.as_ref().and_then(NodePart::name) {
                    Some("f") => {
                        if let Some(row) = self.working_row.as_mut() {
                            row.formulas.insert(column, text.to_string());
                        }
                    }
                    Some("v") => {
                        let value = self.resolve_value(&cell, text);
                        self.set_value(column, value);
                        self.current_cell = None;
                    }
                    Some("is") => {
                        let text = rest.iter().rev().find_map(NodePart::as_text).unwrap_or("");
                        self.set_value(column, CellValue::String(text.to_string()));
                    }
                    _ => {}
                }
            }
            "v" => {
                if let Some(cell) = self.current_cell.take() {
                    let text = parts.next();
                    let text = text.as_ref().and_then(NodePart::as_text).unwrap_or("");
                    let value = self.resolve_value(&cell, text);
                    self.set_value(cell.column, value);
                }
            }
            // further rich-text runs of an inline string
            "r" | "t" => {
                let inline = self
                    .current_cell
                    .as_ref()
                    .filter(|cell| cell.cell_type.as_deref() == Some("inlineStr"))
                    .map(|cell| cell.column);
                if let (Some(column), Some(text)) =
                    (inline, parts.rev().find_map(|part| match part {
                        NodePart::Text(text) => Some(text),
                        NodePart::Tag(_) => None,
                    }))
                {
                    if let Some(row) = self.working_row.as_mut() {
                        match row.values.get_mut(&column) {
                            Some(CellValue::String(existing)) => existing.push_str(&text),
                            _ => {
                                row.values.insert(column, CellValue::String(text));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn set_value(&mut self, column: u32, value: CellValue) {
        if let Some(row) = self.working_row.as_mut() {
            row.values.insert(column, value);
        }
    }

    fn resolve_value(&self, cell: &CellContext, raw: &str) -> CellValue {
        match cell.cell_type.as_deref() {
            Some("s") => {
                let index = raw.trim().parse::<usize>().ok();
                match index.and_then(|i| self.metadata.shared_string(i)) {
                    Some(text) => CellValue::String(text.to_string()),
                    None => {
                        if self.options.verbose {
                            log::warn!("missing shared string: {}", raw);
                        }
                        CellValue::String(String::new())
                    }
                }
            }
            Some("b") => {
                let raw = raw.trim();
                CellValue::Bool(raw == "1" || raw.eq_ignore_ascii_case("true"))
            }
            Some("e") => CellValue::Error(raw.to_string()),
            Some("str") | Some("inlineStr") | Some("d") => CellValue::String(raw.to_string()),
            _ => self.resolve_numeric(cell.style, raw),
        }
    }

    fn resolve_numeric(&self, style: Option<usize>, raw: &str) -> CellValue {
        let Some(number) = CellValue::parse_number(raw) else {
            return CellValue::String(raw.to_string());
        };
        if !self.options.formatting {
            return number;
        }

        let Some(code) = self.format_code(style) else {
            return number;
        };
        if is_general(code) {
            return number;
        }

        let value = number.as_f64().unwrap_or_default();
        match format_number(code, value, self.metadata.date_system()) {
            Ok(text) => CellValue::String(text),
            Err(e) if is_date_format(code) && self.options.verbose => {
                log::warn!("date value {} outside the calendar: {}", raw, e);
                CellValue::String(String::new())
            }
            Err(e) => {
                log::debug!("cannot render {} with '{}': {}", raw, code, e);
                CellValue::String(String::new())
            }
        }
    }

    fn format_code(&self, style: Option<usize>) -> Option<&str> {
        let id = match style {
            Some(style) => self.metadata.number_format_id(style)?,
            None => 0,
        };
        self.metadata.format_code(id)
    }
}

/// Drop indentation text that sits between tags of one record
fn strip_layout_whitespace(node: &mut Node) {
    let mut i = 0;
    while i < node.len() {
        let is_layout = matches!(&node[i], NodePart::Text(text) if text.trim().is_empty())
            && matches!(node.get(i + 1), Some(NodePart::Tag(_)));
        if is_layout {
            node.remove(i);
        } else {
            i += 1;
        }
    }
}
