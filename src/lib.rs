//! xmlscan - XML entity scanning and version detection
//!
//! The lexical front end of an XML processor: turns a raw byte stream into
//! lexical tokens (names, literals, character runs, comments, processing
//! instructions, declarations) with position tracking and line-end
//! normalization, and decides up front whether XML 1.0 or 1.1 semantics
//! govern the document.
//!
//! Data flow:
//!
//! ```text
//! CharacterSource ---> EntityScanner ---> lexical primitives
//!                                             |
//!                            {DeclScanner, VersionDetector}
//!                                             |
//!                              per-version scanner pipeline ---> DocumentSink
//! ```
//!
//! The version detector peeks at the prolog under a provisional 1.1 policy,
//! commits to 1.0 or 1.1, rewinds the provisional read exactly, and rewires
//! the document/DTD pipeline to the committed per-version components before
//! the first token is emitted.
//!
//! ```
//! use xmlscan::{FrontEnd, DocumentEvent, DocumentSink, XmlVersion};
//!
//! struct Printer;
//! impl DocumentSink for Printer {
//!     fn event(&mut self, event: &DocumentEvent<'_>) {
//!         let _ = event;
//!     }
//! }
//!
//! let mut front = FrontEnd::new();
//! let version = front.set_input_str("<?xml version=\"1.1\"?><a/>").unwrap();
//! assert_eq!(version, XmlVersion::V1_1);
//! front.parse(&mut Printer).unwrap();
//! ```

mod core;
mod error;
mod intern;
mod pipeline;
mod source;

pub use crate::core::chars::XmlVersion;
pub use crate::core::cursor::{EntityScanner, Run, RunEnd, DEFAULT_BUFFER_SIZE};
pub use crate::core::decl::{DeclKind, DeclScanner, Names, XmlDecl};
pub use crate::core::lexical::{
    scan_char_ref, scan_comment, scan_name, scan_pi, scan_quoted_value,
};
pub use crate::error::{
    CollectingReporter, ErrorReporter, NullReporter, Report, ScanError, Severity, XML_DOMAIN,
};
pub use crate::intern::{Symbol, SymbolTable};
pub use crate::pipeline::components::{
    ComponentRegistry, ComponentRole, ContentModelProcessor, DocumentEvent, DocumentSink,
    DtdValidator, NamespaceBinder, PipelineComponent,
};
pub use crate::pipeline::detector::{BindingTable, DetectState, FrontEnd, VersionDetector};
pub use crate::pipeline::scanner::{DocumentScanner, DtdScanner};
pub use crate::source::{CharacterSource, DecodingReader, Encoding, StringSource};
