//! Type definitions for decoded worksheet data

use crate::column::{column_name, column_number};
use crate::format::format_general;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;

/// Represents a single decoded cell value
///
/// Cell types map onto variants rather than onto display text: `t="b"`
/// cells are `Bool` (displayed `TRUE`/`FALSE`, not `1`/`0`), `t="e"` cells
/// are `Error`, and `t="str"` formula results stay `String` even when the
/// text looks numeric. Only untyped or `t="n"` cells are parsed as numbers
/// and run through their number format.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellValue {
    /// Text: shared or inline strings, formula string results, formatted numbers
    String(String),
    /// Integral numeric value
    Int(i64),
    /// Non-integral numeric value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// Error value such as `#DIV/0!`
    Error(String),
}

impl CellValue {
    /// Parse raw numeric cell text, `None` if it is not a number
    pub fn parse_number(raw: &str) -> Option<CellValue> {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            return Some(CellValue::Int(i));
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some(CellValue::Int(f as i64))
                } else {
                    Some(CellValue::Float(f))
                }
            }
            _ => None,
        }
    }

    /// Text as shown in a cell with General format
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Borrow the text of a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integral value, also from whole floats and numeric text
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            CellValue::String(s) => match CellValue::parse_number(s)? {
                CellValue::Int(i) => Some(i),
                _ => None,
            },
            _ => None,
        }
    }

    /// Numeric value, also from numeric text such as an unformatted string cell
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value; text follows the `TRUE`/`FALSE` and `1`/`0` spellings
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Int(0) => Some(false),
            CellValue::Int(1) => Some(true),
            CellValue::String(s) if s.eq_ignore_ascii_case("true") || s == "1" => Some(true),
            CellValue::String(s) if s.eq_ignore_ascii_case("false") || s == "0" => Some(false),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) | CellValue::Error(s) => f.write_str(s),
            CellValue::Int(i) => f.write_str(itoa::Buffer::new().format(*i)),
            CellValue::Float(v) => f.write_str(&format_general(*v)),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
        }
    }
}

macro_rules! cell_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for CellValue {
                fn from(value: $ty) -> Self {
                    CellValue::$variant(value.into())
                }
            }
        )*
    };
}

cell_value_from!(&str => String, String => String, i64 => Int, f64 => Float, bool => Bool);

/// One decoded `<row>` element
///
/// Values and formulas are sparse and keyed by 1-based column number;
/// columns without a cell are simply absent.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Row {
    /// Row number (1-based)
    pub number: u32,
    /// Attributes of the row element (`r`, `spans`, `ht`, ...)
    pub attributes: IndexMap<String, String>,
    /// Cell values by column number
    pub values: BTreeMap<u32, CellValue>,
    /// Formula text by column number
    pub formulas: BTreeMap<u32, String>,
}

impl Row {
    /// Create an empty row
    pub fn new(number: u32) -> Self {
        Row {
            number,
            ..Default::default()
        }
    }

    /// Value at a 1-based column number
    pub fn get(&self, column: u32) -> Option<&CellValue> {
        self.values.get(&column)
    }

    /// Value at a column given by letters (`"C"`) or a cell reference (`"C7"`)
    pub fn get_by_reference(&self, reference: &str) -> Option<&CellValue> {
        self.get(column_number(reference))
    }

    /// Formula text at a 1-based column number
    pub fn formula(&self, column: u32) -> Option<&str> {
        self.formulas.get(&column).map(String::as_str)
    }

    /// Number of populated cells
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if row has no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Highest populated column number, 0 for an empty row
    pub fn last_column(&self) -> u32 {
        self.values.keys().next_back().copied().unwrap_or(0)
    }

    /// Dense strings from column 1 to the last populated one, gaps as ""
    pub fn to_strings(&self) -> Vec<String> {
        (1..=self.last_column())
            .map(|col| self.get(col).map(CellValue::as_string).unwrap_or_default())
            .collect()
    }

    /// Cell reference of a column in this row (`3` → `"C7"` on row 7)
    pub fn reference(&self, column: u32) -> String {
        format!("{}{}", column_name(column), self.number)
    }
}
