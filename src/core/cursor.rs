//! Entity scan cursor
//!
//! The buffered lookahead/consume engine over one entity's decoded
//! characters. Owns position, line and column tracking, newline
//! normalization, and the refill machinery. Entities nest as a stack
//! (general/parameter entity expansion); every operation acts on the top.
//!
//! Key invariants:
//! - The buffer holds decoded UTF-8 and always a whole number of characters.
//! - `skip_*` operations are atomic: they consume exactly their argument or
//!   nothing at all, even when the match spans a buffer refill.
//! - A region pinned with `mark` survives every refill byte-for-byte, so
//!   `rewind_to_mark` restores the exact input the provisional version
//!   sniff consumed.

use memchr::memchr;
use tracing::trace;

use crate::core::chars::{self, XmlVersion};
use crate::error::ScanError;
use crate::source::CharacterSource;

/// Buffer refill granularity
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Saved cursor state for `mark`/`rewind_to_mark`
#[derive(Debug, Clone, Copy)]
struct Mark {
    position: usize,
    line: u32,
    column: u32,
}

/// How a content/literal run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The next character (peeked, not consumed) is not part of the run.
    Stopped(char),
    /// The buffer drained mid-run; call again to continue.
    More,
    /// The current entity's content is exhausted.
    EndOfEntity,
}

/// One scanned run of characters
///
/// Borrows the entity buffer, so it is valid only until the next cursor
/// operation; callers needing the text longer must copy it.
#[derive(Debug)]
pub struct Run<'a> {
    pub bytes: &'a [u8],
    pub end: RunEnd,
}

impl Run<'_> {
    /// The run as UTF-8 text
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.bytes)
    }
}

/// The character buffer of one open entity
pub struct EntityBuffer {
    name: String,
    source: Box<dyn CharacterSource>,
    /// Decoded characters; valid content is `ch[..count]`
    ch: Vec<u8>,
    position: usize,
    count: usize,
    line: u32,
    column: u32,
    /// External entities fold CR/NEL/LS line ends; internal ones do not
    is_external: bool,
    /// Set while expanding an entity referenced inside a quoted literal
    is_literal: bool,
    exhausted: bool,
    mark: Option<Mark>,
}

impl EntityBuffer {
    fn new(name: &str, source: Box<dyn CharacterSource>, is_external: bool, is_literal: bool) -> Self {
        EntityBuffer {
            name: name.to_string(),
            source,
            ch: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            position: 0,
            count: 0,
            line: 1,
            column: 1,
            is_external,
            is_literal,
            exhausted: false,
            mark: None,
        }
    }

    /// Discard consumed bytes before `keep_from` (never past an active mark)
    fn compact(&mut self, keep_from: usize) {
        let keep = match self.mark {
            Some(m) => m.position.min(keep_from),
            None => keep_from,
        };
        if keep == 0 {
            return;
        }
        self.ch.drain(..keep);
        self.count -= keep;
        self.position -= keep;
        if let Some(m) = &mut self.mark {
            m.position -= keep;
        }
    }

    /// Append more decoded characters, without moving existing ones
    ///
    /// Returns false once the entity's content is exhausted.
    fn fill_more(&mut self) -> Result<bool, ScanError> {
        if self.exhausted {
            return Ok(false);
        }
        let n = self.source.fill(&mut self.ch, DEFAULT_BUFFER_SIZE)?;
        self.count = self.ch.len();
        if n == 0 {
            self.exhausted = true;
            trace!(entity = %self.name, "entity content exhausted");
            Ok(false)
        } else {
            trace!(entity = %self.name, bytes = n, "buffer refill");
            Ok(true)
        }
    }

    /// Consume a leading run of line ends, normalizing them in place
    ///
    /// Collapsed sequences slide the run start right instead of shifting the
    /// buffer left: each logical newline keeps exactly one slot, and every
    /// surviving slot is rewritten to `\n`. Returns the slid start offset;
    /// the normalized run is `ch[offset..position]`.
    fn normalize_newline_run(&mut self, v11: bool) -> Result<usize, ScanError> {
        let external = self.is_external;
        let mut offset = self.position;
        loop {
            if self.position == self.count {
                break;
            }
            let b = self.ch[self.position];
            if b == b'\n' {
                self.position += 1;
            } else if external && b == b'\r' {
                self.position += 1;
                if self.position == self.count {
                    // The LF half of a CRLF may arrive with the next refill
                    let _ = self.fill_more()?;
                }
                if self.position < self.count && self.ch[self.position] == b'\n' {
                    self.position += 1;
                    offset += 1;
                } else if v11 && is_nel(&self.ch[..self.count], self.position) {
                    self.position += 2;
                    offset += 2;
                }
            } else if external && v11 && is_nel(&self.ch[..self.count], self.position) {
                self.position += 2;
                offset += 1;
            } else if external && v11 && is_ls(&self.ch[..self.count], self.position) {
                self.position += 3;
                offset += 2;
            } else {
                break;
            }
            self.line += 1;
            self.column = 1;
        }
        for b in &mut self.ch[offset..self.position] {
            *b = b'\n';
        }
        Ok(offset)
    }

    /// Consume `[position..upto)`, appending it to `out` with line ends
    /// normalized to `\n`
    fn flush_normalized(&mut self, upto: usize, out: &mut Vec<u8>, v11: bool) {
        let external = self.is_external;
        let mut i = self.position;
        while i < upto {
            let b = self.ch[i];
            if b == b'\n' {
                out.push(b'\n');
                i += 1;
                self.line += 1;
                self.column = 1;
            } else if external && b == b'\r' {
                i += 1;
                if i < self.count && self.ch[i] == b'\n' {
                    i += 1;
                } else if v11 && is_nel(&self.ch[..self.count], i) {
                    i += 2;
                }
                out.push(b'\n');
                self.line += 1;
                self.column = 1;
            } else if external && v11 && is_nel(&self.ch[..self.count], i) {
                out.push(b'\n');
                i += 2;
                self.line += 1;
                self.column = 1;
            } else if external && v11 && is_ls(&self.ch[..self.count], i) {
                out.push(b'\n');
                i += 3;
                self.line += 1;
                self.column = 1;
            } else {
                out.push(b);
                i += 1;
                if b & 0xC0 != 0x80 {
                    self.column += 1;
                }
            }
        }
        self.position = i;
    }
}

/// The buffered cursor over the entity stack
///
/// All scanning operations act on the top entity. The `version` field is
/// the newline/whitespace policy in force; the version detector sets it to
/// 1.1 provisionally and overwrites it on commit.
pub struct EntityScanner {
    stack: Vec<EntityBuffer>,
    version: XmlVersion,
}

impl EntityScanner {
    /// Create a scanner with no open entity, under 1.0 rules
    pub fn new() -> Self {
        EntityScanner {
            stack: Vec::new(),
            version: XmlVersion::V1_0,
        }
    }

    /// Drop all open entities, ready for a new parse
    pub fn reset(&mut self) {
        self.stack.clear();
        self.version = XmlVersion::V1_0;
    }

    /// The newline/whitespace policy in force
    pub fn version(&self) -> XmlVersion {
        self.version
    }

    /// Change the newline/whitespace policy
    pub fn set_version(&mut self, version: XmlVersion) {
        self.version = version;
    }

    /// Open an entity on top of the stack
    pub fn push_entity(
        &mut self,
        name: &str,
        source: Box<dyn CharacterSource>,
        is_external: bool,
        is_literal: bool,
    ) {
        trace!(entity = name, is_external, is_literal, "push entity");
        self.stack
            .push(EntityBuffer::new(name, source, is_external, is_literal));
    }

    /// Close the top entity; returns false if the stack was empty
    pub fn pop_entity(&mut self) -> bool {
        match self.stack.pop() {
            Some(ent) => {
                trace!(entity = %ent.name, "pop entity");
                true
            }
            None => false,
        }
    }

    /// Number of open entities
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Line number in the current entity (1-based)
    pub fn line(&self) -> u32 {
        self.stack.last().map_or(0, |e| e.line)
    }

    /// Column number in the current entity (1-based)
    pub fn column(&self) -> u32 {
        self.stack.last().map_or(0, |e| e.column)
    }

    /// Pin the current position; subsequent refills preserve everything
    /// from here on, byte for byte
    pub fn mark(&mut self) {
        if let Some(ent) = self.stack.last_mut() {
            ent.mark = Some(Mark {
                position: ent.position,
                line: ent.line,
                column: ent.column,
            });
        }
    }

    /// Restore the position pinned by `mark` exactly, clearing the mark
    pub fn rewind_to_mark(&mut self) {
        if let Some(ent) = self.stack.last_mut() {
            if let Some(m) = ent.mark.take() {
                ent.position = m.position;
                ent.line = m.line;
                ent.column = m.column;
            }
        }
    }

    fn current(&mut self) -> Result<&mut EntityBuffer, ScanError> {
        self.stack.last_mut().ok_or(ScanError::UnexpectedEndOfInput)
    }

    /// Look at the next character without consuming it
    ///
    /// External-entity line ends (CR, and under 1.1 NEL/LS) are reported as
    /// `\n`; the buffer itself is only rewritten on consumption.
    pub fn peek(&mut self) -> Result<char, ScanError> {
        let version = self.version;
        let ent = self.current()?;
        if ent.position == ent.count {
            let p = ent.position;
            ent.compact(p);
            if !ent.fill_more()? {
                return Err(ScanError::UnexpectedEndOfInput);
            }
        }
        let (c, _) = utf8_char_at(&ent.ch[..ent.count], ent.position);
        if ent.is_external
            && (c == '\r'
                || (version == XmlVersion::V1_1
                    && (c == chars::NEL || c == chars::LINE_SEPARATOR)))
        {
            return Ok('\n');
        }
        Ok(c)
    }

    /// Consume and return the next character, normalizing line ends
    ///
    /// In an external entity CR, CRLF (and under 1.1 NEL, LS and CR+NEL)
    /// each become one `\n` and bump the line counter. Internal entities
    /// treat only `\n` as a line end.
    pub fn scan_char(&mut self) -> Result<char, ScanError> {
        let version = self.version;
        let v11 = version == XmlVersion::V1_1;
        let ent = self.current()?;
        if ent.position == ent.count {
            let p = ent.position;
            ent.compact(p);
            if !ent.fill_more()? {
                return Err(ScanError::UnexpectedEndOfInput);
            }
        }
        let (c, len) = utf8_char_at(&ent.ch[..ent.count], ent.position);
        ent.position += len;
        if c == '\n' {
            ent.line += 1;
            ent.column = 1;
            return Ok('\n');
        }
        if ent.is_external {
            if c == '\r' {
                ent.line += 1;
                ent.column = 1;
                if ent.position == ent.count {
                    let _ = ent.fill_more()?;
                }
                if ent.position < ent.count {
                    if ent.ch[ent.position] == b'\n' {
                        ent.position += 1;
                    } else if v11 && is_nel(&ent.ch[..ent.count], ent.position) {
                        ent.position += 2;
                    }
                }
                return Ok('\n');
            }
            if v11 && (c == chars::NEL || c == chars::LINE_SEPARATOR) {
                ent.line += 1;
                ent.column = 1;
                return Ok('\n');
            }
        }
        ent.column += 1;
        Ok(c)
    }

    /// Consume the next character if it equals `c` (after normalization)
    ///
    /// Never consumes on mismatch; end of entity counts as a mismatch.
    pub fn skip_char(&mut self, c: char) -> Result<bool, ScanError> {
        match self.peek() {
            Ok(p) if p == c => {
                self.scan_char()?;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(ScanError::UnexpectedEndOfInput) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Consume `s` exactly, or nothing at all
    ///
    /// Atomic even when `s` spans a buffer refill: the candidate region is
    /// compared in place and the position only moves on a full match. `s`
    /// must not contain line ends (it is matched against raw characters).
    pub fn skip_string(&mut self, s: &[u8]) -> Result<bool, ScanError> {
        let Some(ent) = self.stack.last_mut() else {
            return Ok(false);
        };
        while ent.count - ent.position < s.len() {
            let p = ent.position;
            ent.compact(p);
            if !ent.fill_more()? {
                return Ok(false);
            }
        }
        if &ent.ch[ent.position..ent.position + s.len()] == s {
            ent.position += s.len();
            ent.column += s.len() as u32;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume a run of whitespace; true if anything was consumed
    ///
    /// Under the 1.1 policy NEL and LS count (they normalize to `\n`
    /// before the test). Raw CR in an internal entity is whitespace too.
    pub fn skip_spaces(&mut self) -> Result<bool, ScanError> {
        let mut any = false;
        loop {
            match self.peek() {
                Ok(c) if chars::is_space(c) => {
                    self.scan_char()?;
                    any = true;
                }
                Ok(_) => break,
                Err(ScanError::UnexpectedEndOfInput) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(any)
    }

    /// Scan a maximal run of content characters
    ///
    /// Embedded line ends are normalized to `\n` in place. The run may end
    /// early at a refill boundary (`RunEnd::More`) or at an embedded line
    /// end (`RunEnd::Stopped('\n')`); repeated calls converge on the full
    /// run.
    pub fn scan_content(&mut self) -> Result<Run<'_>, ScanError> {
        self.scan_run(None)
    }

    /// Scan a literal value run, additionally stopping at the quote (unless
    /// the current entity is a nested-expansion literal) and at `%`
    pub fn scan_literal(&mut self, quote: char) -> Result<Run<'_>, ScanError> {
        self.scan_run(Some(quote as u8))
    }

    fn scan_run(&mut self, literal: Option<u8>) -> Result<Run<'_>, ScanError> {
        let version = self.version;
        let v11 = version == XmlVersion::V1_1;
        let Some(ent) = self.stack.last_mut() else {
            return Err(ScanError::UnexpectedEndOfInput);
        };
        let external = ent.is_external;
        let quote_stops = if ent.is_literal { None } else { literal };
        if ent.position == ent.count {
            let p = ent.position;
            ent.compact(p);
            if !ent.fill_more()? {
                return Ok(Run {
                    bytes: &[],
                    end: RunEnd::EndOfEntity,
                });
            }
        }
        let offset = ent.normalize_newline_run(v11)?;
        let mut end = RunEnd::More;
        while ent.position < ent.count {
            let b = ent.ch[ent.position];
            if b < 0x80 {
                let stop = match b {
                    b'<' | b'&' => Some(b as char),
                    b'%' if literal.is_some() => Some('%'),
                    q if quote_stops == Some(q) => Some(q as char),
                    b'\n' => Some('\n'),
                    b'\r' if external => Some('\n'),
                    // Tab is always content; raw CR in an internal entity
                    // passes through unnormalized
                    b'\t' | b'\r' => None,
                    0x20..=0x7E => None,
                    0x7F => {
                        if v11 {
                            Some('\u{7F}')
                        } else {
                            None
                        }
                    }
                    _ => Some(b as char),
                };
                match stop {
                    Some(c) => {
                        end = RunEnd::Stopped(c);
                        break;
                    }
                    None => {
                        ent.position += 1;
                        ent.column += 1;
                    }
                }
            } else {
                let (c, len) = utf8_char_at(&ent.ch[..ent.count], ent.position);
                if external && v11 && (c == chars::NEL || c == chars::LINE_SEPARATOR) {
                    end = RunEnd::Stopped('\n');
                    break;
                }
                if chars::is_char(c, version) && !(v11 && chars::is_restricted(c)) {
                    ent.position += len;
                    ent.column += 1;
                } else {
                    end = RunEnd::Stopped(c);
                    break;
                }
            }
        }
        let p = ent.position;
        Ok(Run {
            bytes: &ent.ch[offset..p],
            end,
        })
    }

    /// Accumulate characters into `out` until `delim` is matched
    ///
    /// Line ends in the accumulated text are normalized. Returns `Ok(true)`
    /// when a buffer's worth was flushed and more remains (call again),
    /// `Ok(false)` once the delimiter has been consumed. A delimiter that
    /// spans a refill boundary is matched by holding the partial match in
    /// place across the refill. If the entity ends before the delimiter the
    /// accumulated text is still flushed and `UnexpectedEndOfInput` raised.
    pub fn scan_delimited_run(
        &mut self,
        delim: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<bool, ScanError> {
        debug_assert!(!delim.is_empty());
        let v11 = self.version == XmlVersion::V1_1;
        let Some(ent) = self.stack.last_mut() else {
            return Err(ScanError::UnexpectedEndOfInput);
        };
        let external = ent.is_external;
        if ent.position == ent.count {
            let p = ent.position;
            ent.compact(p);
            if !ent.fill_more()? {
                return Err(ScanError::UnexpectedEndOfInput);
            }
        }
        let first = delim[0];
        loop {
            match memchr(first, &ent.ch[ent.position..ent.count]) {
                Some(rel) => {
                    let cand = ent.position + rel;
                    ent.flush_normalized(cand, out, v11);
                    if cand + delim.len() > ent.count {
                        // The delimiter may span the refill boundary
                        if !ent.fill_more()? {
                            let c = ent.count;
                            ent.flush_normalized(c, out, v11);
                            return Err(ScanError::UnexpectedEndOfInput);
                        }
                        continue;
                    }
                    if &ent.ch[cand..cand + delim.len()] == delim {
                        ent.position = cand + delim.len();
                        ent.column += delim.len() as u32;
                        return Ok(false);
                    }
                    out.push(first);
                    ent.position = cand + 1;
                    ent.column += 1;
                }
                None => {
                    let mut upto = ent.count;
                    // Hold back a trailing CR; its LF half may arrive with
                    // the next refill
                    if external && upto > ent.position && ent.ch[upto - 1] == b'\r' {
                        upto -= 1;
                    }
                    ent.flush_normalized(upto, out, v11);
                    if ent.position < ent.count {
                        if !ent.fill_more()? {
                            let c = ent.count;
                            ent.flush_normalized(c, out, v11);
                            return Err(ScanError::UnexpectedEndOfInput);
                        }
                        continue;
                    }
                    let p = ent.position;
                    ent.compact(p);
                    if !ent.fill_more()? {
                        return Err(ScanError::UnexpectedEndOfInput);
                    }
                    return Ok(true);
                }
            }
        }
    }
}

impl Default for EntityScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the character at `at`; the buffer always holds whole characters
#[inline]
fn utf8_char_at(buf: &[u8], at: usize) -> (char, usize) {
    let b = buf[at];
    if b < 0x80 {
        return (b as char, 1);
    }
    let len = if b >= 0xF0 {
        4
    } else if b >= 0xE0 {
        3
    } else {
        2
    };
    let end = (at + len).min(buf.len());
    match std::str::from_utf8(&buf[at..end]).ok().and_then(|s| s.chars().next()) {
        Some(c) => (c, c.len_utf8()),
        None => (char::REPLACEMENT_CHARACTER, 1),
    }
}

#[inline]
fn is_nel(buf: &[u8], at: usize) -> bool {
    at + 1 < buf.len() && buf[at] == 0xC2 && buf[at + 1] == 0x85
}

#[inline]
fn is_ls(buf: &[u8], at: usize) -> bool {
    at + 2 < buf.len() && buf[at] == 0xE2 && buf[at + 1] == 0x80 && buf[at + 2] == 0xA8
}
