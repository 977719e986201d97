//! Lexical primitives built on the entity scan cursor
//!
//! Names, numeric character references, comments and processing
//! instructions. These are the pieces the declaration reader and the
//! per-version scanners compose; none of them knows anything about
//! document structure.

use crate::core::chars;
use crate::core::cursor::{EntityScanner, RunEnd};
use crate::error::ScanError;
use crate::intern::{Symbol, SymbolTable};

/// Scan the longest run matching the XML name productions
///
/// Returns `Ok(None)` without consuming anything if the next character
/// cannot start a name (or the entity is exhausted).
pub fn scan_name(
    sc: &mut EntityScanner,
    symbols: &mut SymbolTable,
) -> Result<Option<Symbol>, ScanError> {
    let first = match sc.peek() {
        Ok(c) => c,
        Err(ScanError::UnexpectedEndOfInput) => return Ok(None),
        Err(e) => return Err(e),
    };
    if !chars::is_name_start(first) {
        return Ok(None);
    }
    let mut name = String::new();
    name.push(sc.scan_char()?);
    loop {
        match sc.peek() {
            Ok(c) if chars::is_name_char(c) => {
                sc.scan_char()?;
                name.push(c);
            }
            Ok(_) => break,
            Err(ScanError::UnexpectedEndOfInput) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(symbols.intern(name.as_bytes())))
}

/// Scan a numeric character reference, after `&#` has been consumed
///
/// An optional leading `x` selects hexadecimal. Requires the terminating
/// `;` and a resulting code point that is a legal character for the
/// version in force; a malformed number folds into the same
/// `InvalidCharacterReference` failure.
pub fn scan_char_ref(sc: &mut EntityScanner) -> Result<char, ScanError> {
    let hex = sc.skip_char('x')?;
    let mut digits = String::new();
    loop {
        let c = sc.peek()?;
        let is_digit = if hex {
            c.is_ascii_hexdigit()
        } else {
            c.is_ascii_digit()
        };
        if !is_digit {
            break;
        }
        sc.scan_char()?;
        digits.push(c);
    }
    if !sc.skip_char(';')? {
        return Err(ScanError::SemicolonRequiredInCharRef);
    }
    if digits.is_empty() {
        return Err(ScanError::InvalidCharacterReference);
    }
    let radix = if hex { 16 } else { 10 };
    let cp = u32::from_str_radix(&digits, radix).unwrap_or(u32::MAX);
    char::from_u32(cp)
        .filter(|&c| chars::is_char(c, sc.version()))
        .ok_or(ScanError::InvalidCharacterReference)
}

/// Scan a comment body, after `<!--` has been consumed
///
/// Accumulates until `--` and requires the closing `>`; `--` anywhere else
/// inside the body is `MalformedComment`. The body lands in `out` with
/// line ends normalized.
pub fn scan_comment(sc: &mut EntityScanner, out: &mut Vec<u8>) -> Result<(), ScanError> {
    while sc.scan_delimited_run(b"--", out)? {}
    if !sc.skip_char('>')? {
        return Err(ScanError::MalformedComment);
    }
    Ok(())
}

/// Scan a processing instruction, after `<?` has been consumed
///
/// Rejects a target that case-insensitively equals `xml`. The data (which
/// may be empty) is accumulated up to and excluding the closing `?>`.
pub fn scan_pi(
    sc: &mut EntityScanner,
    symbols: &mut SymbolTable,
) -> Result<(Symbol, Vec<u8>), ScanError> {
    let target = scan_name(sc, symbols)?.ok_or(ScanError::PiTargetRequired)?;
    check_pi_target(symbols, target)?;
    let data = scan_pi_data(sc)?;
    Ok((target, data))
}

/// Reject the reserved `xml` target, in any case combination
pub fn check_pi_target(symbols: &SymbolTable, target: Symbol) -> Result<(), ScanError> {
    let name = symbols.get_str(target).unwrap_or("");
    if name.eq_ignore_ascii_case("xml") {
        return Err(ScanError::ReservedPiTarget(name.to_string()));
    }
    Ok(())
}

/// Scan PI data after the target name
///
/// Whitespace must separate the target from any data; with no whitespace
/// only an immediate `?>` is accepted.
pub fn scan_pi_data(sc: &mut EntityScanner) -> Result<Vec<u8>, ScanError> {
    let mut data = Vec::new();
    if sc.skip_spaces()? {
        while sc.scan_delimited_run(b"?>", &mut data)? {}
    } else if !sc.skip_string(b"?>")? {
        return Err(ScanError::SpaceRequiredInPi);
    }
    Ok(data)
}

/// Scan a quoted value up to (and consuming) the closing quote
///
/// `%`, `&` and `<` carry no meaning inside declaration-level literals, so
/// they are taken as ordinary characters; an illegal character is
/// `InvalidCharInDecl`, and end of entity before the quote is
/// `UnexpectedEndOfInput` (callers map it to their own missing-quote key).
pub fn scan_quoted_value(sc: &mut EntityScanner, quote: char) -> Result<String, ScanError> {
    let mut value = Vec::new();
    loop {
        let (flushed, end) = {
            let run = sc.scan_literal(quote)?;
            (run.bytes.to_vec(), run.end)
        };
        value.extend_from_slice(&flushed);
        match end {
            RunEnd::Stopped(c) if c == quote => {
                sc.scan_char()?;
                break;
            }
            RunEnd::Stopped(c) => {
                if !chars::is_char(c, sc.version()) {
                    return Err(ScanError::InvalidCharInDecl(c));
                }
                sc.scan_char()?;
                let mut scratch = [0u8; 4];
                value.extend_from_slice(c.encode_utf8(&mut scratch).as_bytes());
            }
            RunEnd::More => continue,
            RunEnd::EndOfEntity => return Err(ScanError::UnexpectedEndOfInput),
        }
    }
    Ok(String::from_utf8_lossy(&value).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chars::XmlVersion;
    use crate::source::StringSource;

    fn scanner(text: &str) -> (EntityScanner, SymbolTable) {
        let mut sc = EntityScanner::new();
        sc.push_entity("doc", Box::new(StringSource::new(text)), true, false);
        (sc, SymbolTable::new())
    }

    fn scanner_chunked(text: &str, chunk: usize) -> (EntityScanner, SymbolTable) {
        let mut sc = EntityScanner::new();
        sc.push_entity("doc", Box::new(StringSource::with_chunk(text, chunk)), true, false);
        (sc, SymbolTable::new())
    }

    #[test]
    fn test_scan_name() {
        let (mut sc, mut syms) = scanner("root-el.2 rest");
        let sym = scan_name(&mut sc, &mut syms).unwrap().unwrap();
        assert_eq!(syms.get_str(sym), Some("root-el.2"));
        assert_eq!(sc.peek().unwrap(), ' ');
    }

    #[test]
    fn test_scan_name_rejects_bad_start() {
        let (mut sc, mut syms) = scanner("1abc");
        assert!(scan_name(&mut sc, &mut syms).unwrap().is_none());
        // Nothing consumed
        assert_eq!(sc.peek().unwrap(), '1');
    }

    #[test]
    fn test_scan_name_interns() {
        let (mut sc, mut syms) = scanner("a a");
        let first = scan_name(&mut sc, &mut syms).unwrap().unwrap();
        sc.skip_spaces().unwrap();
        let second = scan_name(&mut sc, &mut syms).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_char_ref_decimal() {
        let (mut sc, _) = scanner("65;x");
        assert_eq!(scan_char_ref(&mut sc).unwrap(), 'A');
        assert_eq!(sc.peek().unwrap(), 'x');
    }

    #[test]
    fn test_char_ref_hex() {
        let (mut sc, _) = scanner("x1F600;");
        assert_eq!(scan_char_ref(&mut sc).unwrap(), '\u{1F600}');
    }

    #[test]
    fn test_char_ref_above_unicode_range() {
        let (mut sc, _) = scanner("x110000;");
        assert!(matches!(
            scan_char_ref(&mut sc),
            Err(ScanError::InvalidCharacterReference)
        ));
    }

    #[test]
    fn test_char_ref_illegal_code_point() {
        let (mut sc, _) = scanner("x0;");
        assert!(matches!(
            scan_char_ref(&mut sc),
            Err(ScanError::InvalidCharacterReference)
        ));
    }

    #[test]
    fn test_char_ref_restricted_allowed_in_11() {
        // U+0001 is illegal in 1.0 but referencable in 1.1
        let (mut sc, _) = scanner("x1;");
        assert!(scan_char_ref(&mut sc).is_err());

        let (mut sc, _) = scanner("x1;");
        sc.set_version(XmlVersion::V1_1);
        assert_eq!(scan_char_ref(&mut sc).unwrap(), '\u{1}');
    }

    #[test]
    fn test_char_ref_missing_semicolon() {
        let (mut sc, _) = scanner("65x");
        assert!(matches!(
            scan_char_ref(&mut sc),
            Err(ScanError::SemicolonRequiredInCharRef)
        ));
    }

    #[test]
    fn test_char_ref_no_digits() {
        let (mut sc, _) = scanner(";");
        assert!(matches!(
            scan_char_ref(&mut sc),
            Err(ScanError::InvalidCharacterReference)
        ));
    }

    #[test]
    fn test_comment_simple() {
        let (mut sc, _) = scanner(" a comment -->after");
        let mut out = Vec::new();
        scan_comment(&mut sc, &mut out).unwrap();
        assert_eq!(out, b" a comment ");
        assert_eq!(sc.peek().unwrap(), 'a');
    }

    #[test]
    fn test_comment_spanning_refills() {
        let whole = {
            let (mut sc, _) = scanner("long body here-->");
            let mut out = Vec::new();
            scan_comment(&mut sc, &mut out).unwrap();
            out
        };
        for chunk in 1..7 {
            let (mut sc, _) = scanner_chunked("long body here-->", chunk);
            let mut out = Vec::new();
            scan_comment(&mut sc, &mut out).unwrap();
            assert_eq!(out, whole, "chunk={}", chunk);
        }
    }

    #[test]
    fn test_comment_double_hyphen_rejected() {
        let (mut sc, _) = scanner("bad -- body -->");
        let mut out = Vec::new();
        assert!(matches!(
            scan_comment(&mut sc, &mut out),
            Err(ScanError::MalformedComment)
        ));
    }

    #[test]
    fn test_pi_basic() {
        let (mut sc, mut syms) = scanner("target some data?>rest");
        let (target, data) = scan_pi(&mut sc, &mut syms).unwrap();
        assert_eq!(syms.get_str(target), Some("target"));
        assert_eq!(data, b"some data");
        assert_eq!(sc.peek().unwrap(), 'r');
    }

    #[test]
    fn test_pi_empty_data() {
        let (mut sc, mut syms) = scanner("target?>");
        let (_, data) = scan_pi(&mut sc, &mut syms).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_pi_reserved_target() {
        for text in ["xml version=\"1.0\"?>", "XML ?>", "XmL?>"] {
            let (mut sc, mut syms) = scanner(text);
            assert!(matches!(
                scan_pi(&mut sc, &mut syms),
                Err(ScanError::ReservedPiTarget(_))
            ));
        }
    }

    #[test]
    fn test_pi_requires_space_before_data() {
        let (mut sc, mut syms) = scanner("target@data?>");
        assert!(matches!(
            scan_pi(&mut sc, &mut syms),
            Err(ScanError::SpaceRequiredInPi)
        ));
    }

    #[test]
    fn test_quoted_value() {
        let (mut sc, _) = scanner("hello world\"rest");
        let value = scan_quoted_value(&mut sc, '"').unwrap();
        assert_eq!(value, "hello world");
        assert_eq!(sc.peek().unwrap(), 'r');
    }

    #[test]
    fn test_quoted_value_takes_percent_literally() {
        let (mut sc, _) = scanner("a%b&c'x");
        let value = scan_quoted_value(&mut sc, '\'').unwrap();
        assert_eq!(value, "a%b&c");
    }

    #[test]
    fn test_quoted_value_missing_close() {
        let (mut sc, _) = scanner("never closed");
        assert!(matches!(
            scan_quoted_value(&mut sc, '"'),
            Err(ScanError::UnexpectedEndOfInput)
        ));
    }
}
