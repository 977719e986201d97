//! XML and text declaration reader
//!
//! Parses the pseudo-attributes of `<?xml ...?>` as an ordered state
//! machine: `version` then `encoding` then `standalone`, with the rules
//! differing between a document XML declaration and the text declaration
//! of an external entity. The caller has already consumed `<?xml` and
//! verified that whitespace follows.

use crate::core::chars::XmlVersion;
use crate::core::cursor::EntityScanner;
use crate::core::lexical::{scan_name, scan_quoted_value};
use crate::error::ScanError;
use crate::intern::{Symbol, SymbolTable};

/// Which kind of declaration is being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// The document's XML declaration (`standalone` allowed)
    Xml,
    /// A text declaration in an external entity (`version` optional,
    /// `encoding` required, `standalone` forbidden)
    Text,
}

/// The pseudo-attribute triple of one declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlDecl {
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// Interned names the declaration reader compares against
#[derive(Debug, Clone, Copy)]
pub struct Names {
    pub version: Symbol,
    pub encoding: Symbol,
    pub standalone: Symbol,
}

impl Names {
    pub fn intern(symbols: &mut SymbolTable) -> Self {
        Names {
            version: symbols.intern(b"version"),
            encoding: symbols.intern(b"encoding"),
            standalone: symbols.intern(b"standalone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclState {
    ExpectVersion,
    ExpectEncoding,
    ExpectStandalone,
    Done,
}

/// Reader for one declaration's pseudo-attributes
#[derive(Debug, Clone, Copy)]
pub struct DeclScanner {
    kind: DeclKind,
    version: XmlVersion,
}

impl DeclScanner {
    /// A reader for the given declaration kind under the committed version
    pub fn new(kind: DeclKind, version: XmlVersion) -> Self {
        DeclScanner { kind, version }
    }

    /// Scan pseudo-attributes up to and including the closing `?>`
    pub fn scan(
        &self,
        sc: &mut EntityScanner,
        symbols: &mut SymbolTable,
        names: &Names,
    ) -> Result<XmlDecl, ScanError> {
        let mut state = DeclState::ExpectVersion;
        let mut decl = XmlDecl::default();
        loop {
            let saw_space = sc.skip_spaces()?;
            if sc.skip_char('?')? {
                if !sc.skip_char('>')? {
                    return Err(ScanError::XmlDeclUnterminated);
                }
                break;
            }
            let Some(name) = scan_name(sc, symbols)? else {
                return Err(ScanError::XmlDeclUnterminated);
            };
            let name_text = symbols.get_str(name).unwrap_or("").to_string();
            if !saw_space {
                return Err(ScanError::SpaceRequiredInDecl(name_text));
            }
            sc.skip_spaces()?;
            if !sc.skip_char('=')? {
                return Err(ScanError::EqRequiredInDecl(name_text));
            }
            sc.skip_spaces()?;
            let quote = match sc.peek() {
                Ok(c @ ('"' | '\'')) => {
                    sc.scan_char()?;
                    c
                }
                Ok(_) | Err(ScanError::UnexpectedEndOfInput) => {
                    return Err(ScanError::QuoteRequiredInDecl(name_text));
                }
                Err(e) => return Err(e),
            };
            let value = match scan_quoted_value(sc, quote) {
                Ok(v) => v,
                Err(ScanError::UnexpectedEndOfInput) => {
                    return Err(ScanError::CloseQuoteMissingInDecl(name_text));
                }
                Err(e) => return Err(e),
            };
            state = self.transition(state, name, name_text, value, names, &mut decl)?;
        }

        // A document declaration must carry version, a text declaration
        // must carry encoding.
        match self.kind {
            DeclKind::Xml if decl.version.is_none() => Err(ScanError::VersionInfoRequired),
            DeclKind::Text if decl.encoding.is_none() => Err(ScanError::EncodingDeclRequired),
            _ => Ok(decl),
        }
    }

    fn transition(
        &self,
        state: DeclState,
        name: Symbol,
        name_text: String,
        value: String,
        names: &Names,
        decl: &mut XmlDecl,
    ) -> Result<DeclState, ScanError> {
        match state {
            DeclState::ExpectVersion => {
                if name == names.version {
                    if value != self.version.as_str() {
                        return Err(ScanError::VersionNotSupported(value));
                    }
                    decl.version = Some(value);
                    Ok(DeclState::ExpectEncoding)
                } else if name == names.encoding && self.kind == DeclKind::Text {
                    // Text declarations may omit version
                    decl.encoding = Some(value);
                    Ok(DeclState::Done)
                } else {
                    Err(match self.kind {
                        DeclKind::Xml => ScanError::VersionInfoRequired,
                        DeclKind::Text => ScanError::EncodingDeclRequired,
                    })
                }
            }
            DeclState::ExpectEncoding => {
                if name == names.encoding {
                    decl.encoding = Some(value);
                    Ok(match self.kind {
                        DeclKind::Xml => DeclState::ExpectStandalone,
                        DeclKind::Text => DeclState::Done,
                    })
                } else if name == names.standalone && self.kind == DeclKind::Xml {
                    // standalone directly after version; encoding is
                    // optional in a document declaration
                    decl.standalone = Some(parse_standalone(&value)?);
                    Ok(DeclState::Done)
                } else {
                    Err(match self.kind {
                        DeclKind::Xml => ScanError::NoMorePseudoAttributes(name_text),
                        DeclKind::Text => ScanError::EncodingDeclRequired,
                    })
                }
            }
            DeclState::ExpectStandalone => {
                if name == names.standalone && self.kind == DeclKind::Xml {
                    decl.standalone = Some(parse_standalone(&value)?);
                    Ok(DeclState::Done)
                } else {
                    Err(ScanError::NoMorePseudoAttributes(name_text))
                }
            }
            DeclState::Done => Err(ScanError::MorePseudoAttributes(name_text)),
        }
    }
}

fn parse_standalone(value: &str) -> Result<bool, ScanError> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(ScanError::SdDeclInvalid(other.to_string())),
    }
}
