//! Package fixtures: a small ZIP writer plus XLSX part generators
#![allow(dead_code)]

use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Cursor, Seek, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflated,
}

/// Central directory record of a written member
struct ZipEntry {
    name: String,
    local_header_offset: u64,
    method: u16,
    flags: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

/// In-memory ZIP writer; members land in the order they are added
pub struct PackageBuilder {
    output: Cursor<Vec<u8>>,
    entries: Vec<ZipEntry>,
    method: Method,
    data_descriptors: bool,
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageBuilder {
    pub fn new() -> Self {
        PackageBuilder {
            output: Cursor::new(Vec::new()),
            entries: Vec::new(),
            method: Method::Deflated,
            data_descriptors: true,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Trailing descriptors (bit 3) as streaming writers produce, or sizes up front
    pub fn data_descriptors(mut self, enabled: bool) -> Self {
        self.data_descriptors = enabled;
        self
    }

    pub fn add(mut self, name: &str, data: &[u8]) -> Self {
        let body = match self.method {
            Method::Stored => data.to_vec(),
            Method::Deflated => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(6));
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
        };
        let mut crc = Crc32::new();
        crc.update(data);
        let crc32 = crc.finalize();

        let method: u16 = match self.method {
            Method::Stored => 0,
            Method::Deflated => 8,
        };
        // stored members need their sizes up front to be streamable
        let descriptor = self.data_descriptors && self.method == Method::Deflated;
        let flags: u16 = if descriptor { 0x0008 } else { 0 };

        let out = &mut self.output;
        let local_header_offset = out.stream_position().unwrap();
        out.write_all(&[0x50, 0x4b, 0x03, 0x04]).unwrap();
        out.write_all(&20u16.to_le_bytes()).unwrap(); // version needed
        out.write_all(&flags.to_le_bytes()).unwrap();
        out.write_all(&method.to_le_bytes()).unwrap();
        out.write_all(&[0, 0, 0, 0]).unwrap(); // mod time/date
        if descriptor {
            out.write_all(&[0; 12]).unwrap();
        } else {
            out.write_all(&crc32.to_le_bytes()).unwrap();
            out.write_all(&(body.len() as u32).to_le_bytes()).unwrap();
            out.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
        }
        out.write_all(&(name.len() as u16).to_le_bytes()).unwrap();
        out.write_all(&0u16.to_le_bytes()).unwrap(); // extra len
        out.write_all(name.as_bytes()).unwrap();
        out.write_all(&body).unwrap();

        if descriptor {
            out.write_all(&[0x50, 0x4b, 0x07, 0x08]).unwrap();
            out.write_all(&crc32.to_le_bytes()).unwrap();
            out.write_all(&(body.len() as u32).to_le_bytes()).unwrap();
            out.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
        }

        self.entries.push(ZipEntry {
            name: name.to_string(),
            local_header_offset,
            method,
            flags,
            crc32,
            compressed_size: body.len() as u32,
            uncompressed_size: data.len() as u32,
        });
        self
    }

    /// Bytes written so far, as a truncated upload would leave them
    pub fn truncated(self) -> Vec<u8> {
        self.output.into_inner()
    }

    /// Central directory, end record, and the finished bytes
    pub fn finish(mut self) -> Vec<u8> {
        let out = &mut self.output;
        let central_dir_offset = out.stream_position().unwrap();

        for entry in &self.entries {
            out.write_all(&[0x50, 0x4b, 0x01, 0x02]).unwrap();
            out.write_all(&20u16.to_le_bytes()).unwrap(); // version made by
            out.write_all(&20u16.to_le_bytes()).unwrap(); // version needed
            out.write_all(&entry.flags.to_le_bytes()).unwrap();
            out.write_all(&entry.method.to_le_bytes()).unwrap();
            out.write_all(&[0, 0, 0, 0]).unwrap();
            out.write_all(&entry.crc32.to_le_bytes()).unwrap();
            out.write_all(&entry.compressed_size.to_le_bytes()).unwrap();
            out.write_all(&entry.uncompressed_size.to_le_bytes()).unwrap();
            out.write_all(&(entry.name.len() as u16).to_le_bytes()).unwrap();
            out.write_all(&[0; 12]).unwrap(); // extra, comment, disk, attrs
            out.write_all(&(entry.local_header_offset as u32).to_le_bytes())
                .unwrap();
            out.write_all(entry.name.as_bytes()).unwrap();
        }

        let central_dir_size = out.stream_position().unwrap() - central_dir_offset;

        out.write_all(&[0x50, 0x4b, 0x05, 0x06]).unwrap();
        out.write_all(&[0; 4]).unwrap(); // disk numbers
        out.write_all(&(self.entries.len() as u16).to_le_bytes()).unwrap();
        out.write_all(&(self.entries.len() as u16).to_le_bytes()).unwrap();
        out.write_all(&(central_dir_size as u32).to_le_bytes()).unwrap();
        out.write_all(&(central_dir_offset as u32).to_le_bytes()).unwrap();
        out.write_all(&0u16.to_le_bytes()).unwrap(); // comment len

        self.output.into_inner()
    }
}

/// Zip named parts in the given order
pub fn package(parts: &[(String, String)]) -> Vec<u8> {
    parts
        .iter()
        .fold(PackageBuilder::new(), |builder, (name, xml)| {
            builder.add(name, xml.as_bytes())
        })
        .finish()
}

pub const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#;

pub const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

/// Style 0 is General, 1 is `dd/mm/yyyy`, 2 is `0.00`
pub const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="1"><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/></numFmts><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><cellStyleXfs count="1"><xf numFmtId="0" fontId="0"/></cellStyleXfs><cellXfs count="3"><xf numFmtId="0" fontId="0" xfId="0"/><xf numFmtId="164" fontId="0" xfId="0" applyNumberFormat="1"/><xf numFmtId="2" fontId="0" xfId="0" applyNumberFormat="1"/></cellXfs></styleSheet>"#;

pub fn workbook_xml(names: &[&str], date1904: bool) -> String {
    let sheets: String = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                name,
                i + 1,
                i + 1
            )
        })
        .collect();
    let pr = if date1904 {
        r#"<workbookPr date1904="1"/>"#
    } else {
        "<workbookPr/>"
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{}<sheets>{}</sheets></workbook>"#,
        pr, sheets
    )
}

pub fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut rels: String = (1..=sheet_count)
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i, i
            )
        })
        .collect();
    rels.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        sheet_count + 1
    ));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
        rels
    )
}

/// Items are raw `<si>` contents, e.g. `<t>x</t>` or several `<r>` runs
pub fn shared_strings_xml(items: &[&str]) -> String {
    let body: String = items.iter().map(|item| format!("<si>{}</si>", item)).collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{}" uniqueCount="{}">{}</sst>"#,
        items.len(),
        items.len(),
        body
    )
}

/// Wrap raw `<row>` elements into a worksheet document
pub fn sheet_xml(rows: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetPr><pageSetUpPr fitToPage="1"/></sheetPr><dimension ref="A1"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetFormatPr defaultRowHeight="15"/><cols><col min="1" max="1" width="18" customWidth="1"/></cols><sheetData>{}</sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#,
        rows
    )
}

/// `count` rows of: shared string 0, the row number, and an inline string
pub fn numbered_sheet_xml(count: u32) -> String {
    let rows: String = (1..=count)
        .map(|r| {
            format!(
                r#"<row r="{r}"><c r="A{r}" t="s"><v>0</v></c><c r="B{r}"><v>{r}</v></c><c r="C{r}" t="inlineStr"><is><t>row {r}</t></is></c></row>"#
            )
        })
        .collect();
    sheet_xml(&rows)
}

/// Parts in the order Excel writes them: worksheets before styles and
/// shared strings, so every worksheet has to be deferred
pub fn excel_ordered_parts(sheets: &[(&str, String)], shared: &[&str]) -> Vec<(String, String)> {
    let names: Vec<&str> = sheets.iter().map(|(name, _)| *name).collect();

    let mut parts = vec![
        ("[Content_Types].xml".to_string(), CONTENT_TYPES.to_string()),
        ("_rels/.rels".to_string(), ROOT_RELS.to_string()),
        ("xl/workbook.xml".to_string(), workbook_xml(&names, false)),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            workbook_rels_xml(sheets.len()),
        ),
    ];
    for (i, (_, xml)) in sheets.iter().enumerate() {
        parts.push((format!("xl/worksheets/sheet{}.xml", i + 1), xml.clone()));
    }
    parts.push((
        "xl/theme/theme1.xml".to_string(),
        "<a:theme xmlns:a=\"a\" name=\"Office\"/>".to_string(),
    ));
    parts.push(("xl/styles.xml".to_string(), STYLES.to_string()));
    parts.push(("xl/sharedStrings.xml".to_string(), shared_strings_xml(shared)));
    parts.push((
        "docProps/app.xml".to_string(),
        "<Properties/>".to_string(),
    ));
    parts
}

/// Same parts with every worksheet moved after the metadata, so all are live
pub fn metadata_first(parts: Vec<(String, String)>) -> Vec<(String, String)> {
    let (sheets, mut rest): (Vec<_>, Vec<_>) = parts
        .into_iter()
        .partition(|(name, _)| name.starts_with("xl/worksheets/"));
    rest.extend(sheets);
    rest
}
