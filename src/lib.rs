//! # xlsxstream
//!
//! Event-driven streaming reader for XLSX workbooks.
//!
//! ## Features
//!
//! - **Forward-only**: Reads the ZIP container member by member, never seeks, works on pipes
//! - **Row events**: Worksheets decode lazily into sparse rows, one at a time
//! - **Out-of-order packages**: Worksheets that precede shared strings or styles are spooled
//!   to temporary files and replayed once the metadata is known
//! - **Number formats**: Numeric cells rendered through their cell style (dates, percent, ...)
//! - **Skip and abort**: Skip unwanted sheets or stop the whole session at any point
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xlsxstream::{Event, SheetEvent, WorkbookReader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = WorkbookReader::open("data.xlsx")?;
//!
//! while let Some(event) = reader.next_event()? {
//!     if let Event::Worksheet(sheet) = event {
//!         for event in sheet.process() {
//!             match event? {
//!                 SheetEvent::Row(row) => println!("Row {}: {:?}", row.number, row.to_strings()),
//!                 SheetEvent::End(end) => println!("{} rows", end.row_count),
//!             }
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Options
//!
//! ```rust,no_run
//! use xlsxstream::{ReaderOptions, WorkbookReader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // raw numbers instead of formatted text, overridable via XLSXSTREAM_* variables
//! let options = ReaderOptions::from_env().with_formatting(false);
//! let _reader = WorkbookReader::open_with_options("data.xlsx", options)?;
//! # Ok(())
//! # }
//! ```

pub mod column;
pub mod deferred;
pub mod error;
pub mod format;
pub mod metadata;
pub mod options;
pub mod reader;
pub mod streaming_zip_reader;
pub mod types;
pub mod worksheet;
pub mod xml;

pub use column::{column_name, column_number};
pub use error::{Result, XlsxError};
pub use format::DateSystem;
pub use metadata::WorkbookMetadata;
pub use options::ReaderOptions;
pub use reader::{AbortHandle, Event, WorkbookReader};
pub use types::{CellValue, Row};
pub use worksheet::{Rows, SheetEnd, SheetEvent, Worksheet};
