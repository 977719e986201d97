//! Version detection and pipeline switching
//!
//! Before any token is emitted, the detector peeks at the prolog under a
//! provisional XML 1.1 newline policy and tries to match the literal
//! `<?xml version="1.1"` signature. Success commits 1.1; any failure
//! commits 1.0. Either way the provisional read is rewound exactly, so the
//! committed scanner re-reads the identical prolog from the start.
//!
//! On commit the front end rebuilds its binding table: the per-version
//! document and DTD scanners are lazily created, cached and reused across
//! parses, and any optional components installed in the registry are
//! swapped in place to their committed-version counterparts.

use tracing::debug;

use crate::core::chars::XmlVersion;
use crate::core::cursor::EntityScanner;
use crate::core::decl::Names;
use crate::error::{ErrorReporter, NullReporter, ScanError, XML_DOMAIN};
use crate::intern::SymbolTable;
use crate::pipeline::components::{
    standard_component, ComponentRegistry, ComponentRole, DocumentSink,
};
use crate::pipeline::scanner::{DocumentScanner, DtdScanner};
use crate::source::{CharacterSource, DecodingReader, StringSource};

/// Where the detector is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectState {
    Undetermined,
    Detecting,
    Committed(XmlVersion),
}

/// Sniffs the document version from the prolog
#[derive(Debug)]
pub struct VersionDetector {
    state: DetectState,
}

impl VersionDetector {
    pub fn new() -> Self {
        VersionDetector {
            state: DetectState::Undetermined,
        }
    }

    pub fn state(&self) -> DetectState {
        self.state
    }

    /// Decide the document's version, leaving the input untouched
    ///
    /// The scan runs under the provisional 1.1 policy (a superset of the
    /// 1.0 newline/whitespace rules, so the sniff cannot corrupt position
    /// tracking for a 1.0 re-read) and is rewound whether or not the 1.1
    /// signature matched. The cursor is left configured for the committed
    /// version.
    pub fn determine(&mut self, sc: &mut EntityScanner) -> Result<XmlVersion, ScanError> {
        self.state = DetectState::Detecting;
        sc.set_version(XmlVersion::V1_1);
        sc.mark();
        let matched = Self::match_11_signature(sc);
        sc.rewind_to_mark();
        let version = if matched? {
            XmlVersion::V1_1
        } else {
            XmlVersion::V1_0
        };
        sc.set_version(version);
        self.state = DetectState::Committed(version);
        debug!(version = version.as_str(), "document version committed");
        Ok(version)
    }

    /// Try to match `<?xml` S `version` Eq quote `1.1` quote
    ///
    /// Failing to match is not an error; it is how 1.0 gets selected.
    fn match_11_signature(sc: &mut EntityScanner) -> Result<bool, ScanError> {
        if !sc.skip_string(b"<?xml")? {
            return Ok(false);
        }
        if !sc.skip_spaces()? {
            // Covers targets that merely start with xml (<?xml-stylesheet)
            return Ok(false);
        }
        if !sc.skip_string(b"version")? {
            return Ok(false);
        }
        sc.skip_spaces()?;
        if !sc.skip_char('=')? {
            return Ok(false);
        }
        sc.skip_spaces()?;
        let quote = match sc.peek() {
            Ok(c @ ('"' | '\'')) => c,
            Ok(_) => return Ok(false),
            Err(ScanError::UnexpectedEndOfInput) => return Ok(false),
            Err(e) => return Err(e),
        };
        sc.scan_char()?;
        if !sc.skip_string(b"1.1")? {
            return Ok(false);
        }
        sc.skip_char(quote)
    }
}

impl Default for VersionDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-parse record of which components serve which role
///
/// Rebuilt from scratch on every `set_input_source`; every bound slot
/// agrees with the single committed version.
#[derive(Debug, Clone)]
pub struct BindingTable {
    pub version: XmlVersion,
    pub bound: Vec<ComponentRole>,
}

/// The scanning front end
///
/// Owns the cursor, symbol table, detector, component registry and the
/// cached per-version scanner instances. One parse may be in progress at a
/// time; cached components are reset before each reuse.
pub struct FrontEnd {
    scanner: EntityScanner,
    symbols: SymbolTable,
    names: Names,
    detector: VersionDetector,
    registry: ComponentRegistry,
    reporter: Box<dyn ErrorReporter>,
    doc_scanners: [Option<DocumentScanner>; 2],
    dtd_scanners: [Option<DtdScanner>; 2],
    binding: Option<BindingTable>,
}

impl FrontEnd {
    pub fn new() -> Self {
        Self::with_reporter(Box::new(NullReporter))
    }

    pub fn with_reporter(reporter: Box<dyn ErrorReporter>) -> Self {
        let mut symbols = SymbolTable::new();
        let names = Names::intern(&mut symbols);
        FrontEnd {
            scanner: EntityScanner::new(),
            symbols,
            names,
            detector: VersionDetector::new(),
            registry: ComponentRegistry::new(),
            reporter,
            doc_scanners: [None, None],
            dtd_scanners: [None, None],
            binding: None,
        }
    }

    /// The component registry, for installing optional components
    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The binding table of the current parse, if one is set up
    pub fn binding(&self) -> Option<&BindingTable> {
        self.binding.as_ref()
    }

    /// The committed version of the current parse
    pub fn version(&self) -> Option<XmlVersion> {
        self.binding.as_ref().map(|b| b.version)
    }

    /// Start a new document: detect its version and rewire the pipeline
    ///
    /// Everything left over from a previous parse is dropped; the binding
    /// table is rebuilt, never patched.
    pub fn set_input_source(
        &mut self,
        name: &str,
        source: Box<dyn CharacterSource>,
    ) -> Result<XmlVersion, ScanError> {
        self.binding = None;
        self.scanner.reset();
        self.scanner.push_entity(name, source, true, false);
        let version = match self.detector.determine(&mut self.scanner) {
            Ok(v) => v,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };
        self.bind_pipeline(version);
        Ok(version)
    }

    /// Convenience wrapper for in-memory documents
    pub fn set_input_str(&mut self, text: &str) -> Result<XmlVersion, ScanError> {
        self.set_input_source("[document]", Box::new(StringSource::new(text)))
    }

    /// Start a new document from a raw byte stream
    ///
    /// The encoding is sniffed from the BOM or initial byte pattern.
    pub fn set_input_reader<R: std::io::Read + 'static>(
        &mut self,
        name: &str,
        reader: R,
    ) -> Result<XmlVersion, ScanError> {
        self.set_input_source(name, Box::new(DecodingReader::new(reader)))
    }

    fn bind_pipeline(&mut self, version: XmlVersion) {
        let i = version.idx();
        let doc = self.doc_scanners[i].get_or_insert_with(|| DocumentScanner::new(version));
        doc.reset();
        let dtd = self.dtd_scanners[i].get_or_insert_with(|| DtdScanner::new(version));
        dtd.reset();
        self.registry.reset_all();

        let mut bound = vec![ComponentRole::DocumentScanner, ComponentRole::DtdScanner];
        for role in [
            ComponentRole::DtdValidator,
            ComponentRole::DtdContentModel,
            ComponentRole::NamespaceBinder,
        ] {
            let installed_version = match self.registry.get(role) {
                Some(component) => component.version(),
                None => continue,
            };
            if installed_version != version {
                if let Some(replacement) = standard_component(role, version) {
                    let _ = self.registry.replace(role, replacement);
                }
            }
            bound.push(role);
        }
        debug!(version = version.as_str(), ?bound, "pipeline bound");
        self.binding = Some(BindingTable { version, bound });
    }

    /// Scan the document, delivering lexical events to `sink`
    pub fn parse(&mut self, sink: &mut dyn DocumentSink) -> Result<(), ScanError> {
        let result = self.parse_inner(sink);
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    fn parse_inner(&mut self, sink: &mut dyn DocumentSink) -> Result<(), ScanError> {
        let version = match &self.binding {
            Some(b) => b.version,
            None => return Err(ScanError::NoInputSource),
        };
        let i = version.idx();
        let FrontEnd {
            scanner,
            symbols,
            names,
            registry,
            doc_scanners,
            dtd_scanners,
            ..
        } = self;
        let (Some(doc), Some(dtd)) = (doc_scanners[i].as_mut(), dtd_scanners[i].as_mut()) else {
            return Err(ScanError::NoInputSource);
        };
        doc.scan_document(scanner, symbols, names, dtd, registry, sink)
    }

    fn report(&mut self, e: &ScanError) {
        self.reporter
            .report(e.severity(), XML_DOMAIN, e.key(), &e.args());
    }
}

impl Default for FrontEnd {
    fn default() -> Self {
        Self::new()
    }
}
