//! Forward-only ZIP reader - walks local file headers in archive order
//!
//! Unlike a central-directory reader this never seeks, so it works on pipes,
//! sockets and any other `Read`. Members are yielded in the order they were
//! written, which is why the workbook reader has to cope with worksheets
//! arriving before the shared strings they reference.

use crate::error::{Result, XlsxError};
use crc32fast::Hasher as Crc32;
use flate2::{Decompress, FlushDecompress, Status};
use std::io::{self, BufRead, BufReader, Read};

/// ZIP local file header signature
const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP central directory signature
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// Zip64 end of central directory record signature
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;

/// Optional signature in front of a data descriptor
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;
const ZIP64_SIZE_MARKER: u32 = 0xFFFF_FFFF;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Local header of the member currently being read
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub path: String,
    pub compression_method: u16,
    pub flags: u16,
    pub crc32: u32,
    /// `None` when the sizes trail the data in a descriptor
    pub compressed_size: Option<u64>,
    pub uncompressed_size: Option<u64>,
    zip64: bool,
}

impl EntryHeader {
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

enum Body {
    Stored {
        remaining: u64,
    },
    Deflated {
        inflater: Decompress,
        remaining: Option<u64>,
        done: bool,
    },
}

struct CurrentEntry {
    header: EntryHeader,
    body: Body,
    crc: Crc32,
}

/// Streaming ZIP archive reader over any byte source
pub struct StreamingZipReader<R: Read> {
    input: BufReader<R>,
    current: Option<CurrentEntry>,
    exhausted: bool,
}

impl<R: Read> StreamingZipReader<R> {
    pub fn new(reader: R) -> Self {
        StreamingZipReader {
            input: BufReader::with_capacity(64 * 1024, reader), // 64KB buffer
            current: None,
            exhausted: false,
        }
    }

    /// Advance to the next member, discarding whatever is left of the current one
    ///
    /// Returns `Ok(None)` once the central directory (or a clean end of input)
    /// is reached.
    pub fn next_entry(&mut self) -> Result<Option<EntryHeader>> {
        self.finish_current()?;

        if self.exhausted {
            return Ok(None);
        }

        let signature = match self.read_signature()? {
            Some(signature) => signature,
            None => {
                self.exhausted = true;
                return Ok(None);
            }
        };

        match signature {
            LOCAL_FILE_HEADER_SIGNATURE => {}
            CENTRAL_DIRECTORY_SIGNATURE
            | END_OF_CENTRAL_DIRECTORY_SIGNATURE
            | ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE => {
                self.exhausted = true;
                return Ok(None);
            }
            other => {
                self.exhausted = true;
                return Err(XlsxError::InvalidSignature(other));
            }
        }

        let header = match self.read_local_header() {
            Ok(header) => header,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };

        let body = match Self::body_for(&header) {
            Ok(body) => body,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };

        self.current = Some(CurrentEntry {
            header: header.clone(),
            body,
            crc: Crc32::new(),
        });

        Ok(Some(header))
    }

    /// Reader over the decompressed bytes of the current member
    pub fn entry_reader(&mut self) -> EntryReader<'_, R> {
        EntryReader { zip: self }
    }

    /// Consume every remaining member without decompressing into memory
    pub fn drain(&mut self) -> Result<()> {
        while self.next_entry()?.is_some() {}
        Ok(())
    }

    fn body_for(header: &EntryHeader) -> Result<Body> {
        if header.flags & FLAG_ENCRYPTED != 0 {
            return Err(XlsxError::Encrypted(header.path.clone()));
        }

        match header.compression_method {
            METHOD_STORED => match header.compressed_size {
                Some(remaining) => Ok(Body::Stored { remaining }),
                None => Err(XlsxError::UnsupportedEntry {
                    path: header.path.clone(),
                    reason: "stored member without sizes in its local header".to_string(),
                }),
            },
            METHOD_DEFLATED => Ok(Body::Deflated {
                // raw deflate, no zlib header
                inflater: Decompress::new(false),
                remaining: header.compressed_size,
                done: false,
            }),
            method => Err(XlsxError::UnsupportedCompression {
                path: header.path.clone(),
                method,
            }),
        }
    }

    fn read_local_header(&mut self) -> Result<EntryHeader> {
        // Skip version needed
        self.skip(2)?;
        let flags = self.read_u16_le()?;
        let compression_method = self.read_u16_le()?;

        // Skip modification time and date
        self.skip(4)?;

        let crc32 = self.read_u32_le()?;
        let compressed_size = self.read_u32_le()?;
        let uncompressed_size = self.read_u32_le()?;
        let filename_len = self.read_u16_le()? as usize;
        let extra_len = self.read_u16_le()? as usize;

        let mut filename_buf = vec![0u8; filename_len];
        self.input.read_exact(&mut filename_buf)?;
        let path = String::from_utf8_lossy(&filename_buf).to_string();

        let mut extra = vec![0u8; extra_len];
        self.input.read_exact(&mut extra)?;

        let mut compressed = compressed_size as u64;
        let mut uncompressed = uncompressed_size as u64;
        let mut zip64 = false;
        if compressed_size == ZIP64_SIZE_MARKER || uncompressed_size == ZIP64_SIZE_MARKER {
            if let Some((u, c)) =
                parse_zip64_extra(&extra, uncompressed_size, compressed_size)
            {
                uncompressed = u;
                compressed = c;
                zip64 = true;
            }
        }

        let deferred_sizes = flags & FLAG_DATA_DESCRIPTOR != 0 && compressed == 0;

        Ok(EntryHeader {
            path,
            compression_method,
            flags,
            crc32,
            compressed_size: (!deferred_sizes).then_some(compressed),
            uncompressed_size: (!deferred_sizes).then_some(uncompressed),
            zip64,
        })
    }

    fn finish_current(&mut self) -> Result<()> {
        let mut entry = match self.current.take() {
            Some(entry) => entry,
            None => return Ok(()),
        };

        let mut scratch = [0u8; 8 * 1024];
        while read_body(&mut self.input, &mut entry, &mut scratch)? > 0 {}

        // Deflate stream ended before the recorded compressed size
        if let Body::Deflated {
            remaining: Some(left),
            ..
        } = entry.body
        {
            if left > 0 {
                self.skip(left)?;
            }
        }

        let mut expected = entry.header.crc32;
        if entry.header.has_data_descriptor() {
            let first = self.read_u32_le()?;
            expected = if first == DATA_DESCRIPTOR_SIGNATURE {
                self.read_u32_le()?
            } else {
                first
            };
            // compressed + uncompressed sizes
            self.skip(if entry.header.zip64 { 16 } else { 8 })?;
        }

        let actual = entry.crc.finalize();
        if actual != expected {
            self.exhausted = true;
            return Err(XlsxError::CrcMismatch {
                path: entry.header.path,
                expected,
                actual,
            });
        }

        Ok(())
    }

    fn read_signature(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(buf))),
            _ => Err(XlsxError::InvalidSignature(u32::from_le_bytes(buf))),
        }
    }

    fn skip(&mut self, count: u64) -> Result<()> {
        let copied = io::copy(&mut (&mut self.input).take(count), &mut io::sink())?;
        if copied < count {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.input.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.input.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

/// Find 64-bit sizes in the Zip64 extended information field
///
/// Only the fields whose 32-bit counterparts hold the marker are present,
/// uncompressed size first.
fn parse_zip64_extra(extra: &[u8], uncompressed: u32, compressed: u32) -> Option<(u64, u64)> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let data = extra.get(pos + 4..pos + 4 + size)?;

        if id == ZIP64_EXTRA_FIELD_ID {
            let mut fields = data
                .chunks_exact(8)
                .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap_or([0; 8])));
            let u = if uncompressed == ZIP64_SIZE_MARKER {
                fields.next()?
            } else {
                uncompressed as u64
            };
            let c = if compressed == ZIP64_SIZE_MARKER {
                fields.next()?
            } else {
                compressed as u64
            };
            return Some((u, c));
        }

        pos += 4 + size;
    }
    None
}

fn read_body<R: Read>(
    input: &mut BufReader<R>,
    entry: &mut CurrentEntry,
    out: &mut [u8],
) -> io::Result<usize> {
    if out.is_empty() {
        return Ok(0);
    }

    let produced = match &mut entry.body {
        Body::Stored { remaining } => {
            if *remaining == 0 {
                return Ok(0);
            }
            let max = (*remaining).min(out.len() as u64) as usize;
            let n = input.read(&mut out[..max])?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            *remaining -= n as u64;
            n
        }
        Body::Deflated {
            inflater,
            remaining,
            done,
        } => loop {
            if *done {
                return Ok(0);
            }

            let available = input.fill_buf()?;
            let limit = match remaining {
                Some(left) => (*left).min(available.len() as u64) as usize,
                None => available.len(),
            };
            let chunk = &available[..limit];
            let at_end = chunk.is_empty();

            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let flush = if at_end {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let status = inflater
                .decompress(chunk, out, flush)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            let consumed = (inflater.total_in() - before_in) as usize;
            let written = (inflater.total_out() - before_out) as usize;
            input.consume(consumed);
            if let Some(left) = remaining {
                *left -= consumed as u64;
            }

            if status == Status::StreamEnd {
                *done = true;
            }
            if written > 0 {
                break written;
            }
            if *done {
                return Ok(0);
            }
            if at_end && consumed == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate stream truncated",
                ));
            }
        },
    };

    entry.crc.update(&out[..produced]);
    Ok(produced)
}

/// Decompressed view of the current member
pub struct EntryReader<'a, R: Read> {
    zip: &'a mut StreamingZipReader<R>,
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let StreamingZipReader { input, current, .. } = &mut *self.zip;
        match current {
            Some(entry) => read_body(input, entry, buf),
            None => Ok(0),
        }
    }
}
