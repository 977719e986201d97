//! Error taxonomy and the error-reporting sink
//!
//! Every failure the scanning layer can produce is one `ScanError` variant.
//! Errors are reported through an `ErrorReporter` as
//! `(domain, key, arguments, severity)` tuples; the scanner never formats
//! human-readable text for the sink itself (the `Display` impl exists for
//! callers that want a message).

use thiserror::Error;

/// Error domain for XML well-formedness errors
pub const XML_DOMAIN: &str = "http://www.w3.org/TR/1998/REC-xml-19980210";

/// How serious a reported condition is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// Errors produced by the scanning layer
///
/// Structural and version errors are always fatal to the current parse;
/// the scanner reports them and unwinds without retrying.
#[derive(Debug, Error)]
pub enum ScanError {
    /// More input was structurally required but the entity ended.
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,

    /// The `?>` closing an XML or text declaration is missing.
    #[error("XML declaration is not terminated with `?>`")]
    XmlDeclUnterminated,

    /// A comment contained `--` not followed by `>`.
    #[error("comment is not terminated correctly")]
    MalformedComment,

    /// A processing-instruction target matched `xml` case-insensitively.
    #[error("processing instruction target `{0}` is reserved")]
    ReservedPiTarget(String),

    /// A processing instruction had no target name.
    #[error("processing instruction target is required")]
    PiTargetRequired,

    /// Whitespace is required between a PI target and its data.
    #[error("whitespace is required after a processing instruction target")]
    SpaceRequiredInPi,

    /// `standalone` had a value other than `yes` or `no`.
    #[error("standalone declaration value `{0}` must be `yes` or `no`")]
    SdDeclInvalid(String),

    /// A pseudo-attribute appeared where none may follow.
    #[error("no pseudo-attribute may appear after `{0}`")]
    NoMorePseudoAttributes(String),

    /// A pseudo-attribute appeared after the declaration was complete.
    #[error("pseudo-attribute `{0}` appears after the declaration is complete")]
    MorePseudoAttributes(String),

    /// Whitespace is required before a pseudo-attribute.
    #[error("whitespace is required before `{0}`")]
    SpaceRequiredInDecl(String),

    /// `=` missing between a pseudo-attribute name and its value.
    #[error("`=` is required after `{0}` in a declaration")]
    EqRequiredInDecl(String),

    /// A pseudo-attribute value was not quoted.
    #[error("a quoted value is required for `{0}` in a declaration")]
    QuoteRequiredInDecl(String),

    /// The closing quote of a pseudo-attribute value is missing.
    #[error("the closing quote is missing for `{0}` in a declaration")]
    CloseQuoteMissingInDecl(String),

    /// A character not legal for the document's version appeared in a
    /// declaration value.
    #[error("invalid character {0:?} in a declaration value")]
    InvalidCharInDecl(char),

    /// The declared version is not one this scanner supports.
    #[error("XML version `{0}` is not supported")]
    VersionNotSupported(String),

    /// A document XML declaration is missing its `version` pseudo-attribute.
    #[error("the version pseudo-attribute is required in an XML declaration")]
    VersionInfoRequired,

    /// A text declaration is missing its `encoding` pseudo-attribute.
    #[error("the encoding pseudo-attribute is required in a text declaration")]
    EncodingDeclRequired,

    /// A numeric character reference named an illegal code point.
    #[error("character reference does not name a legal XML character")]
    InvalidCharacterReference,

    /// The `;` terminating a reference is missing.
    #[error("`;` is required to terminate a reference")]
    SemicolonRequiredInCharRef,

    /// An end tag was not closed with `>`.
    #[error("end tag `{0}` is not terminated with `>`")]
    TagUnterminated(String),

    /// A DOCTYPE declaration is missing its root element name.
    #[error("a root element name is required in a DOCTYPE declaration")]
    DoctypeNameRequired,

    /// A DOCTYPE declaration was not closed with `>`.
    #[error("DOCTYPE declaration is not terminated with `>`")]
    DoctypeUnterminated,

    /// A character not legal for the document's version appeared in content.
    #[error("invalid character {0:?} in document content")]
    InvalidChar(char),

    /// `parse` was called before `set_input_source`.
    #[error("no input source has been set")]
    NoInputSource,

    /// The raw byte stream could not be decoded with the selected encoding.
    #[error("input is not valid {0}")]
    InvalidEncoding(&'static str),

    /// The underlying reader failed.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Stable message key for the error-reporting sink
    pub fn key(&self) -> &'static str {
        match self {
            ScanError::UnexpectedEndOfInput => "UnexpectedEndOfInput",
            ScanError::XmlDeclUnterminated => "XMLDeclUnterminated",
            ScanError::MalformedComment => "MalformedComment",
            ScanError::ReservedPiTarget(_) => "ReservedPITarget",
            ScanError::PiTargetRequired => "PITargetRequired",
            ScanError::SpaceRequiredInPi => "SpaceRequiredInPI",
            ScanError::SdDeclInvalid(_) => "SDDeclInvalid",
            ScanError::NoMorePseudoAttributes(_) => "NoMorePseudoAttributes",
            ScanError::MorePseudoAttributes(_) => "MorePseudoAttributes",
            ScanError::SpaceRequiredInDecl(_) => "SpaceRequiredInDecl",
            ScanError::EqRequiredInDecl(_) => "EqRequiredInDecl",
            ScanError::QuoteRequiredInDecl(_) => "QuoteRequiredInDecl",
            ScanError::CloseQuoteMissingInDecl(_) => "CloseQuoteMissingInDecl",
            ScanError::InvalidCharInDecl(_) => "InvalidCharInDecl",
            ScanError::VersionNotSupported(_) => "VersionNotSupported",
            ScanError::VersionInfoRequired => "VersionInfoRequired",
            ScanError::EncodingDeclRequired => "EncodingDeclRequired",
            ScanError::InvalidCharacterReference => "InvalidCharacterReference",
            ScanError::SemicolonRequiredInCharRef => "SemicolonRequiredInCharRef",
            ScanError::TagUnterminated(_) => "TagUnterminated",
            ScanError::DoctypeNameRequired => "DoctypeNameRequired",
            ScanError::DoctypeUnterminated => "DoctypeUnterminated",
            ScanError::InvalidChar(_) => "InvalidChar",
            ScanError::NoInputSource => "NoInputSource",
            ScanError::InvalidEncoding(_) => "InvalidEncoding",
            ScanError::Io(_) => "IOError",
        }
    }

    /// Ordered substitution arguments for the error-reporting sink
    pub fn args(&self) -> Vec<String> {
        match self {
            ScanError::ReservedPiTarget(s)
            | ScanError::SdDeclInvalid(s)
            | ScanError::NoMorePseudoAttributes(s)
            | ScanError::MorePseudoAttributes(s)
            | ScanError::SpaceRequiredInDecl(s)
            | ScanError::EqRequiredInDecl(s)
            | ScanError::QuoteRequiredInDecl(s)
            | ScanError::CloseQuoteMissingInDecl(s)
            | ScanError::VersionNotSupported(s)
            | ScanError::TagUnterminated(s) => vec![s.clone()],
            ScanError::InvalidCharInDecl(c) | ScanError::InvalidChar(c) => {
                vec![format!("U+{:04X}", *c as u32)]
            }
            ScanError::InvalidEncoding(name) => vec![(*name).to_string()],
            ScanError::Io(e) => vec![e.to_string()],
            _ => Vec::new(),
        }
    }

    /// All scanning-layer failures abort the current parse.
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }
}

/// Sink for scanner error reports
///
/// Receives the structured form of every failure; formatting and
/// localization are the sink's business, not the scanner's.
pub trait ErrorReporter {
    fn report(&mut self, severity: Severity, domain: &str, key: &str, args: &[String]);
}

/// Reporter that discards everything
#[derive(Debug, Default)]
pub struct NullReporter;

impl ErrorReporter for NullReporter {
    fn report(&mut self, _severity: Severity, _domain: &str, _key: &str, _args: &[String]) {}
}

/// A single captured report
#[derive(Debug, Clone)]
pub struct Report {
    pub severity: Severity,
    pub domain: String,
    pub key: String,
    pub args: Vec<String>,
}

/// Reporter that records reports for later inspection (used by tests)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub reports: Vec<Report>,
}

impl ErrorReporter for CollectingReporter {
    fn report(&mut self, severity: Severity, domain: &str, key: &str, args: &[String]) {
        self.reports.push(Report {
            severity,
            domain: domain.to_string(),
            key: key.to_string(),
            args: args.to_vec(),
        });
    }
}
