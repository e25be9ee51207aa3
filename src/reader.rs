//! Workbook reading: routes package members and sequences events

use crate::deferred::{DeferredSheet, DeferredSheets};
use crate::error::Result;
use crate::metadata::{MetadataPart, WorkbookMetadata};
use crate::options::ReaderOptions;
use crate::streaming_zip_reader::StreamingZipReader;
use crate::worksheet::{sheet_number, Worksheet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Event produced by [`WorkbookReader::next_event`]
#[derive(Debug)]
pub enum Event<'a> {
    /// `xl/workbook.xml` was read; sheet names are known
    WorkbookInfo,
    /// `xl/_rels/workbook.xml.rels` was read
    Relationships,
    /// `xl/sharedStrings.xml` was read
    SharedStrings,
    /// `xl/styles.xml` was read; number formats are known
    Styles,
    /// A worksheet is ready to be processed or skipped
    Worksheet(Worksheet<'a>),
    /// Every worksheet, live and deferred, has been delivered
    End,
}

/// Thread-safe handle that stops a reading session
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Walking container members
    Reading,
    /// Container exhausted, handing out spooled worksheets
    Replaying,
    Finished,
}

/// What the container walk produced; owns nothing borrowed from the reader
enum Step {
    Metadata(MetadataPart),
    LiveSheet(String),
    Replay(DeferredSheet),
    End,
    Done,
}

/// Streaming XLSX reader
///
/// Reads the package strictly forward. Metadata parts are parsed as they
/// arrive; a worksheet is delivered live when everything it references is
/// already known, and otherwise spooled to disk and delivered after the
/// container has been read.
///
/// # Examples
///
/// ```no_run
/// use xlsxstream::{Event, SheetEvent, WorkbookReader};
///
/// let mut reader = WorkbookReader::open("data.xlsx")?;
/// while let Some(event) = reader.next_event()? {
///     match event {
///         Event::Worksheet(sheet) => {
///             println!("sheet {:?}", sheet.name());
///             for event in sheet.process() {
///                 if let SheetEvent::Row(row) = event? {
///                     println!("{}: {:?}", row.number, row.to_strings());
///                 }
///             }
///         }
///         Event::End => println!("done"),
///         _ => {}
///     }
/// }
/// # Ok::<(), xlsxstream::XlsxError>(())
/// ```
pub struct WorkbookReader<R: Read> {
    zip: StreamingZipReader<R>,
    metadata: WorkbookMetadata,
    deferred: DeferredSheets,
    options: ReaderOptions,
    abort: Arc<AtomicBool>,
    state: State,
}

impl WorkbookReader<File> {
    /// Open an XLSX file for streaming
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, ReaderOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::with_options(file, options))
    }
}

impl<R: Read> WorkbookReader<R> {
    /// Read a package from any byte source with default options
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, ReaderOptions::default())
    }

    pub fn with_options(reader: R, options: ReaderOptions) -> Self {
        WorkbookReader {
            zip: StreamingZipReader::new(reader),
            metadata: WorkbookMetadata::new(),
            deferred: DeferredSheets::new(),
            options,
            abort: Arc::new(AtomicBool::new(false)),
            state: State::Reading,
        }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Metadata gathered so far
    pub fn metadata(&self) -> &WorkbookMetadata {
        &self.metadata
    }

    /// Sheet names in workbook order, once `xl/workbook.xml` has been read
    pub fn sheet_names(&self) -> Vec<&str> {
        self.metadata.sheet_names()
    }

    /// Worksheets spooled and waiting for replay
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Stop the session; no further events are produced
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Next event of the session, `None` once it has ended
    ///
    /// Errors from the container or from a metadata part end the session:
    /// the error is returned once and every later call returns `Ok(None)`.
    pub fn next_event(&mut self) -> Result<Option<Event<'_>>> {
        if self.is_aborted() {
            if self.state != State::Finished {
                log::debug!("session aborted");
                self.drain_remaining();
                self.finish();
            }
            return Ok(None);
        }

        let step = self.advance()?;
        let event = match step {
            Step::Metadata(part) => match part {
                MetadataPart::Workbook => Event::WorkbookInfo,
                MetadataPart::Relationships => Event::Relationships,
                MetadataPart::SharedStrings => Event::SharedStrings,
                MetadataPart::Styles => Event::Styles,
            },
            Step::LiveSheet(path) => {
                let source: Box<dyn BufRead + '_> =
                    Box::new(BufReader::new(self.zip.entry_reader()));
                Event::Worksheet(Worksheet::new(
                    &path,
                    source,
                    &self.metadata,
                    self.options,
                    self.abort.clone(),
                ))
            }
            Step::Replay(sheet) => {
                let path = sheet.path().to_string();
                log::debug!("replaying deferred '{}'", path);
                let (reader, spool) = match sheet.open() {
                    Ok(opened) => opened,
                    Err(e) => {
                        self.finish();
                        return Err(e);
                    }
                };
                Event::Worksheet(
                    Worksheet::new(
                        &path,
                        Box::new(reader),
                        &self.metadata,
                        self.options,
                        self.abort.clone(),
                    )
                    .with_spool(spool),
                )
            }
            Step::End => Event::End,
            Step::Done => return Ok(None),
        };

        Ok(Some(event))
    }

    fn advance(&mut self) -> Result<Step> {
        loop {
            match self.state {
                State::Reading => {
                    let entry = match self.zip.next_entry() {
                        Ok(entry) => entry,
                        Err(e) => {
                            self.finish();
                            return Err(e);
                        }
                    };

                    let Some(entry) = entry else {
                        log::debug!(
                            "container exhausted, {} deferred worksheets",
                            self.deferred.len()
                        );
                        self.state = State::Replaying;
                        continue;
                    };
                    let path = entry.path;

                    if let Some(part) = MetadataPart::from_path(&path) {
                        log::debug!("parsing '{}'", path);
                        let source = BufReader::new(self.zip.entry_reader());
                        match self
                            .metadata
                            .parse_part(part, source, &self.options, &self.abort)
                        {
                            Ok(true) => return Ok(Step::Metadata(part)),
                            Ok(false) => return Ok(Step::Done),
                            Err(e) => {
                                self.finish();
                                return Err(e);
                            }
                        }
                    }

                    if sheet_number(&path).is_some() {
                        if self.metadata.is_ready(self.options.formatting)
                            && self.deferred.is_empty()
                        {
                            return Ok(Step::LiveSheet(path));
                        }

                        let mut source = self.zip.entry_reader();
                        if let Err(e) = self.deferred.defer(&path, &mut source) {
                            self.finish();
                            return Err(e);
                        }
                        continue;
                    }

                    // drained by the next call to next_entry
                    log::debug!("discarding '{}'", path);
                }
                State::Replaying => {
                    return Ok(match self.deferred.next_sheet() {
                        Some(sheet) => Step::Replay(sheet),
                        None => {
                            self.state = State::Finished;
                            Step::End
                        }
                    });
                }
                State::Finished => return Ok(Step::Done),
            }
        }
    }

    fn drain_remaining(&mut self) {
        if self.state != State::Reading {
            return;
        }
        if let Err(e) = self.zip.drain() {
            log::debug!("ignoring error while draining aborted session: {}", e);
        }
    }

    fn finish(&mut self) {
        self.state = State::Finished;
        self.deferred.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_corrupt_signature_single_error() {
        let mut reader = WorkbookReader::new(Cursor::new(b"i am not a zip file".to_vec()));

        let err = reader.next_event().unwrap_err();
        assert_eq!(err.to_string(), "invalid signature: 0x6d612069");
        assert!(err.is_container_error());
        assert!(reader.next_event().unwrap().is_none());
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn test_empty_input_ends() {
        let mut reader = WorkbookReader::new(Cursor::new(Vec::new()));
        assert!(matches!(reader.next_event().unwrap(), Some(Event::End)));
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn test_abort_before_start() {
        let mut reader = WorkbookReader::new(Cursor::new(Vec::new()));
        let handle = reader.abort_handle();
        handle.abort();
        assert!(reader.is_aborted());
        assert!(reader.next_event().unwrap().is_none());
    }
}
