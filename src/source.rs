//! Character sources: encoding detection and decoding
//!
//! A `CharacterSource` supplies the decoded characters of one entity
//! (document, external subset, or referenced entity). The scan cursor never
//! touches raw bytes itself; it only asks the source to refill its buffer.
//!
//! Handles detection of UTF-16 and other encodings based on BOM and byte
//! patterns, and converts non-UTF-8 encodings to UTF-8 for scanning.

use std::io::Read;

use crate::error::ScanError;

/// Read granularity for byte-stream decoding
const READ_CHUNK: usize = 4096;

/// Supplies decoded characters for one entity
pub trait CharacterSource {
    /// Append decoded characters to `out` as UTF-8 bytes.
    ///
    /// Appends up to roughly `want` bytes and never splits a character.
    /// Returns the number of bytes appended; `Ok(0)` means the entity's
    /// content is exhausted.
    fn fill(&mut self, out: &mut Vec<u8>, want: usize) -> Result<usize, ScanError>;
}

/// Character encoding of a raw entity byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl Encoding {
    /// Detect encoding from a byte order mark or initial byte pattern
    pub fn detect(input: &[u8]) -> Self {
        if input.len() < 2 {
            return Encoding::Utf8;
        }

        match (input[0], input[1]) {
            // UTF-16 LE BOM: 0xFF 0xFE
            (0xFF, 0xFE) => Encoding::Utf16Le,
            // UTF-16 BE BOM: 0xFE 0xFF
            (0xFE, 0xFF) => Encoding::Utf16Be,
            // UTF-8 BOM: 0xEF 0xBB 0xBF (detected but treated as UTF-8)
            (0xEF, 0xBB) if input.len() >= 3 && input[2] == 0xBF => Encoding::Utf8,
            // No BOM - check for UTF-16 pattern (< preceded or followed by null)
            (0x00, b'<') => Encoding::Utf16Be,
            (b'<', 0x00) => Encoding::Utf16Le,
            _ => Encoding::Utf8,
        }
    }

    /// Human-readable encoding name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Ascii => "US-ASCII",
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16LE",
            Encoding::Utf16Be => "UTF-16BE",
        }
    }

    /// Length of this encoding's byte order mark, if one is present
    fn bom_len(self, input: &[u8]) -> usize {
        match self {
            Encoding::Utf8 if input.starts_with(&[0xEF, 0xBB, 0xBF]) => 3,
            Encoding::Utf16Le if input.starts_with(&[0xFF, 0xFE]) => 2,
            Encoding::Utf16Be if input.starts_with(&[0xFE, 0xFF]) => 2,
            _ => 0,
        }
    }
}

/// Character source decoding a raw byte stream
///
/// The encoding is sniffed from the first bytes unless one is forced with
/// `with_encoding`. Partial sequences at a read boundary (a split UTF-8
/// sequence, a dangling UTF-16 lead surrogate) are carried over to the next
/// `fill` call.
pub struct DecodingReader<R: Read> {
    reader: R,
    encoding: Option<Encoding>,
    /// Raw bytes read but not yet decoded
    raw: Vec<u8>,
    eof: bool,
}

impl<R: Read> DecodingReader<R> {
    /// Create a reader that detects its encoding from the stream
    pub fn new(reader: R) -> Self {
        DecodingReader {
            reader,
            encoding: None,
            raw: Vec::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Create a reader with a known encoding (skipping detection)
    pub fn with_encoding(reader: R, encoding: Encoding) -> Self {
        DecodingReader {
            reader,
            encoding: Some(encoding),
            raw: Vec::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// The encoding in use, once detection has run
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Pull one chunk of raw bytes from the reader
    fn read_more(&mut self) -> Result<(), ScanError> {
        let mut buf = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.raw.extend_from_slice(&buf[..n]);
        }
        Ok(())
    }

    /// Detect the encoding and strip any byte order mark
    fn sniff(&mut self) -> Result<Encoding, ScanError> {
        while self.raw.len() < 4 && !self.eof {
            self.read_more()?;
        }
        let encoding = Encoding::detect(&self.raw);
        let bom = encoding.bom_len(&self.raw);
        if bom > 0 {
            self.raw.drain(..bom);
        }
        self.encoding = Some(encoding);
        Ok(encoding)
    }

    /// Decode as much of `raw` as possible, returning bytes appended
    fn decode(&mut self, out: &mut Vec<u8>, encoding: Encoding) -> Result<usize, ScanError> {
        match encoding {
            Encoding::Utf8 => match std::str::from_utf8(&self.raw) {
                Ok(s) => {
                    let n = s.len();
                    out.extend_from_slice(s.as_bytes());
                    self.raw.clear();
                    Ok(n)
                }
                Err(e) => {
                    if e.error_len().is_some() {
                        return Err(ScanError::InvalidEncoding("UTF-8"));
                    }
                    // Incomplete trailing sequence: carry it over
                    let valid = e.valid_up_to();
                    if self.eof {
                        return Err(ScanError::InvalidEncoding("UTF-8"));
                    }
                    out.extend_from_slice(&self.raw[..valid]);
                    self.raw.drain(..valid);
                    Ok(valid)
                }
            },
            Encoding::Ascii => {
                if self.raw.iter().any(|&b| b >= 0x80) {
                    return Err(ScanError::InvalidEncoding("US-ASCII"));
                }
                let n = self.raw.len();
                out.extend_from_slice(&self.raw);
                self.raw.clear();
                Ok(n)
            }
            Encoding::Utf16Le | Encoding::Utf16Be => self.decode_utf16(out, encoding),
        }
    }

    fn decode_utf16(&mut self, out: &mut Vec<u8>, encoding: Encoding) -> Result<usize, ScanError> {
        let name = encoding.name();
        let mut consumed = 0;
        let mut appended = 0;
        let mut scratch = [0u8; 4];

        loop {
            let rest = &self.raw[consumed..];
            if rest.len() < 2 {
                break;
            }
            let unit = match encoding {
                Encoding::Utf16Le => u16::from_le_bytes([rest[0], rest[1]]),
                _ => u16::from_be_bytes([rest[0], rest[1]]),
            };
            let (c, used) = match unit {
                0xD800..=0xDBFF => {
                    // Lead surrogate: needs a tail unit
                    if rest.len() < 4 {
                        break;
                    }
                    let tail = match encoding {
                        Encoding::Utf16Le => u16::from_le_bytes([rest[2], rest[3]]),
                        _ => u16::from_be_bytes([rest[2], rest[3]]),
                    };
                    if !(0xDC00..=0xDFFF).contains(&tail) {
                        return Err(ScanError::InvalidEncoding(name));
                    }
                    let cp = 0x10000
                        + (((unit as u32 - 0xD800) << 10) | (tail as u32 - 0xDC00));
                    match char::from_u32(cp) {
                        Some(c) => (c, 4),
                        None => return Err(ScanError::InvalidEncoding(name)),
                    }
                }
                0xDC00..=0xDFFF => return Err(ScanError::InvalidEncoding(name)),
                _ => match char::from_u32(unit as u32) {
                    Some(c) => (c, 2),
                    None => return Err(ScanError::InvalidEncoding(name)),
                },
            };
            out.extend_from_slice(c.encode_utf8(&mut scratch).as_bytes());
            appended += c.len_utf8();
            consumed += used;
        }

        // Odd trailing bytes or a dangling surrogate at true end of stream
        // surface as InvalidEncoding from the caller once decoding stalls.
        self.raw.drain(..consumed);
        Ok(appended)
    }
}

impl<R: Read> CharacterSource for DecodingReader<R> {
    fn fill(&mut self, out: &mut Vec<u8>, want: usize) -> Result<usize, ScanError> {
        let encoding = match self.encoding {
            Some(e) => e,
            None => self.sniff()?,
        };

        loop {
            while self.raw.len() < want.min(READ_CHUNK) && !self.eof {
                self.read_more()?;
                if !self.raw.is_empty() {
                    break;
                }
            }
            if self.raw.is_empty() {
                return Ok(0);
            }
            let appended = self.decode(out, encoding)?;
            if appended > 0 {
                return Ok(appended);
            }
            if self.eof {
                // Undecodable remainder at true end of stream
                return if self.raw.is_empty() {
                    Ok(0)
                } else {
                    Err(ScanError::InvalidEncoding(encoding.name()))
                };
            }
            self.read_more()?;
        }
    }
}

/// In-memory character source
///
/// Used for internal entities and tests. `with_chunk` limits how many bytes
/// each `fill` delivers, which lets tests force buffer-refill boundaries at
/// arbitrary points.
pub struct StringSource {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl StringSource {
    /// Create a source over a string
    pub fn new(text: impl Into<String>) -> Self {
        StringSource {
            data: text.into().into_bytes(),
            pos: 0,
            chunk: usize::MAX,
        }
    }

    /// Create a source that delivers at most `chunk` bytes per fill
    pub fn with_chunk(text: impl Into<String>, chunk: usize) -> Self {
        StringSource {
            data: text.into().into_bytes(),
            pos: 0,
            chunk: chunk.max(1),
        }
    }
}

impl CharacterSource for StringSource {
    fn fill(&mut self, out: &mut Vec<u8>, want: usize) -> Result<usize, ScanError> {
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        let mut end = (self.pos + want.min(self.chunk)).min(self.data.len());
        // Never split a character
        while end < self.data.len() && self.data[end] & 0xC0 == 0x80 {
            end -= 1;
        }
        if end == self.pos {
            // Chunk smaller than the character at `pos`: deliver it whole
            end = self.pos + 1;
            while end < self.data.len() && self.data[end] & 0xC0 == 0x80 {
                end += 1;
            }
        }
        let appended = end - self.pos;
        out.extend_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn drain(source: &mut dyn CharacterSource) -> Vec<u8> {
        let mut out = Vec::new();
        while source.fill(&mut out, 8192).map(|n| n > 0).unwrap_or(false) {}
        out
    }

    #[test]
    fn test_detect_utf8() {
        assert_eq!(Encoding::detect(b"<root/>"), Encoding::Utf8);
        assert_eq!(Encoding::detect(b"<?xml"), Encoding::Utf8);
    }

    #[test]
    fn test_detect_utf16_boms() {
        assert_eq!(Encoding::detect(&[0xFF, 0xFE, b'<', 0x00]), Encoding::Utf16Le);
        assert_eq!(Encoding::detect(&[0xFE, 0xFF, 0x00, b'<']), Encoding::Utf16Be);
    }

    #[test]
    fn test_detect_utf16_without_bom() {
        assert_eq!(Encoding::detect(&[b'<', 0x00, b'r', 0x00]), Encoding::Utf16Le);
        assert_eq!(Encoding::detect(&[0x00, b'<', 0x00, b'r']), Encoding::Utf16Be);
    }

    #[test]
    fn test_utf8_passthrough_skips_bom() {
        let mut reader = DecodingReader::new(Cursor::new(b"\xEF\xBB\xBF<a/>".to_vec()));
        assert_eq!(drain(&mut reader), b"<a/>");
        assert_eq!(reader.encoding(), Some(Encoding::Utf8));
    }

    #[test]
    fn test_utf16_le_decodes() {
        let utf16_le = vec![
            0xFF, 0xFE, // BOM
            b'<', 0x00, b'r', 0x00, b'/', 0x00, b'>', 0x00,
        ];
        let mut reader = DecodingReader::new(Cursor::new(utf16_le));
        assert_eq!(drain(&mut reader), b"<r/>");
    }

    #[test]
    fn test_utf16_be_decodes() {
        let utf16_be = vec![
            0xFE, 0xFF, // BOM
            0x00, b'<', 0x00, b'r', 0x00, b'/', 0x00, b'>',
        ];
        let mut reader = DecodingReader::new(Cursor::new(utf16_be));
        assert_eq!(drain(&mut reader), b"<r/>");
    }

    #[test]
    fn test_utf16_surrogate_pair() {
        // U+1F600 as UTF-16LE: D83D DE00
        let bytes = vec![0xFF, 0xFE, 0x3D, 0xD8, 0x00, 0xDE];
        let mut reader = DecodingReader::new(Cursor::new(bytes));
        assert_eq!(drain(&mut reader), "\u{1F600}".as_bytes());
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        let mut reader =
            DecodingReader::with_encoding(Cursor::new(b"caf\xC3\xA9".to_vec()), Encoding::Ascii);
        let mut out = Vec::new();
        assert!(matches!(
            reader.fill(&mut out, 8192),
            Err(ScanError::InvalidEncoding("US-ASCII"))
        ));
    }

    /// Reader that yields one byte per read call, splitting UTF-8 sequences
    struct OneByteReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for OneByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn test_utf8_sequence_split_across_reads() {
        let reader = OneByteReader {
            data: "a\u{00E9}\u{1F600}b".as_bytes().to_vec(),
            pos: 0,
        };
        let mut decoder = DecodingReader::with_encoding(reader, Encoding::Utf8);
        assert_eq!(drain(&mut decoder), "a\u{00E9}\u{1F600}b".as_bytes());
    }

    #[test]
    fn test_string_source_chunks_respect_char_boundaries() {
        let mut source = StringSource::with_chunk("ab\u{00E9}cd", 3);
        let mut out = Vec::new();
        // First fill would end mid-sequence at byte 3; it must back off to 2
        assert_eq!(source.fill(&mut out, 8192).ok(), Some(2));
        assert_eq!(out, b"ab");
        while source.fill(&mut out, 8192).map(|n| n > 0).unwrap_or(false) {}
        assert_eq!(out, "ab\u{00E9}cd".as_bytes());
    }
}
