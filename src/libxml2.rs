//! LibXML2 FFI Wrapper Module
//!
//! Schema compilation and validation are delegated to the system libxml2
//! through direct FFI calls.
//!
//! ## Thread Safety Strategy
//!
//! - **Initialization**: `xmlInitParser`/`xmlInitGlobals` and the installation of
//!   the external-entity loader run exactly once, behind a `std::sync::Once`.
//! - **Schema parsing**: serialized behind a process-wide mutex; the libxml2
//!   schema parser is not thread-safe.
//! - **Validation**: fully parallel. Each call creates its own validation
//!   context, while the compiled schema is shared read-only through an `Arc`.
//!
//! ## External references
//!
//! libxml2 loads `xs:import`, `xs:include` and `xs:redefine` targets through a
//! single process-wide external-entity loader. The loader installed here
//! consults the [`CatalogResolver`] attached to the current thread while a
//! schema is being compiled. Resolved references are loaded from the catalog
//! location; unresolved network references are refused; anything else falls
//! through to libxml2's default loader.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock};

use libc::{c_char, c_int, c_void};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::catalog::{has_uri_scheme, resolve_location};
use crate::error::{LibXml2Error, LibXml2Result};
use crate::event::{Severity, ValidationCollector, ValidationEvent};
use crate::resolver::{CatalogResolver, ExternalReference};

/// Global initialization flag for libxml2
///
/// libxml2's initialization functions are NOT thread-safe, so they are
/// guarded by a `Once`. The catalog-aware entity loader is installed in the
/// same step.
static LIBXML2_INIT: Once = Once::new();

/// libxml2's loader as it was before ours replaced it
static DEFAULT_ENTITY_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

/// Serializes `xmlSchemaParse` across the process
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// Instance documents never touch the network and report errors only
/// through `xmlGetLastError`. Internal subset entities are substituted before
/// validation; no external DTD is loaded.
const XML_PARSE_NOENT: c_int = 1 << 1;
const XML_PARSE_NOERROR: c_int = 1 << 5;
const XML_PARSE_NOWARNING: c_int = 1 << 6;
const XML_PARSE_NONET: c_int = 1 << 11;
const DOCUMENT_PARSE_OPTIONS: c_int =
    XML_PARSE_NOENT | XML_PARSE_NONET | XML_PARSE_NOERROR | XML_PARSE_NOWARNING;

const NETWORK_SCHEMES: [&str; 3] = ["http:", "https:", "ftp:"];

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInput {
    _private: [u8; 0],
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Schema parsing functions
    pub fn xmlSchemaNewParserCtxt(url: *const c_char) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );

    // Document parsing
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // Error state
    pub fn xmlGetLastError() -> *const xmlError;
    pub fn xmlResetLastError();

    // Entity loading
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlSetExternalEntityLoader(loader: XmlExternalEntityLoader);
}

unsafe fn c_str_opt<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Callback for libxml2 to report parser and validation errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let collector = unsafe { &mut *(user_data as *mut ValidationCollector) };
    let error = unsafe { &*error };

    let message = unsafe { c_str_opt(error.message) }
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| format!("libxml2 error code {}", error.code));

    let mut event = ValidationEvent::new(Severity::from_libxml2_level(error.level), message);
    if error.line > 0 {
        event = event.at(error.line as u32, error.int2.max(0) as u32);
    }
    collector.handle_event(event);
}

/// Thread-safe wrapper for libxml2 schema pointer with proper resource management
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 documentation states that xmlSchema structures are thread-safe for reading
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// The pointer must come from `xmlSchemaParse`, and nothing else may free it.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "libxml2 returned no schema".to_string(),
            });
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    /// Only valid while this XmlSchemaPtr exists; must not be freed by the caller.
    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    pub fn ptr_eq(&self, other: &XmlSchemaPtr) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// A compiled schema and the resource path it was compiled from.
///
/// Equality is by path; use [`CompiledSchema::ptr_eq`] for instance identity.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    path: Arc<str>,
    schema: XmlSchemaPtr,
}

impl CompiledSchema {
    pub fn new(path: &str, schema: XmlSchemaPtr) -> Self {
        Self {
            path: Arc::from(path),
            schema,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn schema(&self) -> &XmlSchemaPtr {
        &self.schema
    }

    pub fn ptr_eq(&self, other: &CompiledSchema) -> bool {
        self.schema.ptr_eq(&other.schema)
    }
}

impl PartialEq for CompiledSchema {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for CompiledSchema {}

/// A parsed instance document, freed on drop
#[derive(Debug)]
pub struct XmlDocument {
    ptr: *mut XmlDoc,
}

impl XmlDocument {
    fn as_ptr(&self) -> *mut XmlDoc {
        self.ptr
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlFreeDoc(self.ptr);
            }
        }
    }
}

/// Validation result from libxml2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation succeeded (return code 0)
    Valid,
    /// Validation failed with errors (return code > 0)
    Invalid { error_count: i32 },
    /// Internal error occurred (return code < 0)
    InternalError { code: i32 },
}

impl ValidationResult {
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid { error_count: n },
            n => ValidationResult::InternalError { code: n },
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid { .. })
    }
}

/// A schema reference found by scanning an XSD before libxml2 loads it
#[derive(Debug, Clone, PartialEq, Eq)]
struct SchemaReference {
    namespace: Option<String>,
    schema_location: String,
}

/// How the entity loader should treat one load request
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Resolved(String),
    Refused,
    Default,
}

/// Per-thread state while a schema compile is in progress
struct ResolutionScope {
    resolver: Arc<CatalogResolver>,
    root_url: String,
    references: HashMap<String, SchemaReference>,
    scanned: HashSet<String>,
}

thread_local! {
    static RESOLUTION_SCOPE: RefCell<Option<ResolutionScope>> = const { RefCell::new(None) };
}

impl ResolutionScope {
    fn new(resolver: Arc<CatalogResolver>, root_url: &str) -> Self {
        let mut scope = Self {
            resolver,
            root_url: root_url.to_string(),
            references: HashMap::new(),
            scanned: HashSet::new(),
        };
        scope.register_references_of(root_url);
        scope
    }

    fn route(&mut self, url: Option<&str>, public_id: Option<&str>) -> Route {
        let Some(url) = url else {
            return Route::Default;
        };
        if url == self.root_url {
            return Route::Default;
        }

        let declared = self.references.get(url).cloned();
        let reference = ExternalReference {
            namespace_uri: declared.as_ref().and_then(|r| r.namespace.clone()),
            public_id: public_id.map(str::to_string),
            system_id: Some(
                declared
                    .map(|r| r.schema_location)
                    .unwrap_or_else(|| url.to_string()),
            ),
            base_uri: Some(self.root_url.clone()),
        };

        // libxml2 only loads imports that carry a schemaLocation, so an import
        // mapped by namespace alone is retried without the system id.
        let resolved = self.resolver.resolve(&reference).or_else(|| {
            reference.namespace_uri.as_ref()?;
            self.resolver.resolve(&ExternalReference {
                system_id: None,
                ..reference.clone()
            })
        });

        match resolved {
            Some(location) => {
                self.register_references_of(&location);
                Route::Resolved(location)
            }
            None if is_network_location(url) => {
                tracing::warn!(url = %url, "refusing to load unresolved network schema reference");
                Route::Refused
            }
            None => {
                self.register_references_of(url);
                Route::Default
            }
        }
    }

    /// Record the imports/includes declared by the schema at `location`,
    /// keyed by the URL libxml2 will ask the loader for.
    fn register_references_of(&mut self, location: &str) {
        if !self.scanned.insert(location.to_string()) {
            return;
        }
        let Some(path) = local_file(location) else {
            return;
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return;
        };

        let base = path
            .parent()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        for reference in scan_schema_references(&content) {
            let resolved = resolve_location(&base, &reference.schema_location);
            self.references
                .entry(reference.schema_location.clone())
                .or_insert_with(|| reference.clone());
            self.references.entry(resolved).or_insert(reference);
        }
    }
}

/// Clears the thread's resolution scope when the compile ends, even on error
struct ScopeGuard;

impl ScopeGuard {
    fn enter(scope: ResolutionScope) -> Self {
        RESOLUTION_SCOPE.with(|cell| *cell.borrow_mut() = Some(scope));
        ScopeGuard
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        RESOLUTION_SCOPE.with(|cell| cell.borrow_mut().take());
    }
}

fn is_network_location(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    NETWORK_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn local_file(location: &str) -> Option<PathBuf> {
    let path = match location.strip_prefix("file://") {
        Some(rest) => PathBuf::from(rest),
        None if has_uri_scheme(location) => return None,
        None => PathBuf::from(location),
    };
    path.is_file().then_some(path)
}

/// Collect `xs:import`, `xs:include` and `xs:redefine` declarations.
///
/// Includes and redefines inherit the including schema's target namespace.
fn scan_schema_references(content: &str) -> Vec<SchemaReference> {
    let mut reader = Reader::from_str(content);
    let mut target_namespace: Option<String> = None;
    let mut references = Vec::new();

    loop {
        let element = match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => e,
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => continue,
        };

        let attribute = |name: &str| -> Option<String> {
            element
                .try_get_attribute(name)
                .ok()
                .flatten()
                .and_then(|a| a.unescape_value().ok())
                .map(|v| v.trim().to_string())
        };

        match element.local_name().as_ref() {
            b"schema" => target_namespace = attribute("targetNamespace"),
            b"import" => {
                if let Some(schema_location) = attribute("schemaLocation") {
                    references.push(SchemaReference {
                        namespace: attribute("namespace"),
                        schema_location,
                    });
                }
            }
            b"include" | b"redefine" => {
                if let Some(schema_location) = attribute("schemaLocation") {
                    references.push(SchemaReference {
                        namespace: target_namespace.clone(),
                        schema_location,
                    });
                }
            }
            _ => {}
        }
    }

    references
}

/// Entity loader installed process-wide; routes schema loads through the
/// catalog while a compile scope is active on the calling thread.
///
/// Outside a compile every load is refused, so external entities declared
/// by instance documents are never read.
unsafe extern "C" fn catalog_entity_loader(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let url_str = unsafe { c_str_opt(url) };
    let id_str = unsafe { c_str_opt(id) };

    let route = RESOLUTION_SCOPE.with(|cell| match cell.try_borrow_mut() {
        Ok(mut scope) => scope.as_mut().map(|s| s.route(url_str, id_str)),
        Err(_) => None,
    });

    let Some(default) = DEFAULT_ENTITY_LOADER.get().copied().flatten() else {
        return std::ptr::null_mut();
    };

    match route {
        Some(Route::Resolved(location)) => match CString::new(location) {
            Ok(location) => unsafe { default(location.as_ptr(), id, ctxt) },
            Err(_) => std::ptr::null_mut(),
        },
        Some(Route::Default) => unsafe { default(url, id, ctxt) },
        Some(Route::Refused) | None => {
            tracing::debug!(url = ?url_str, "refusing external load outside a schema compile");
            std::ptr::null_mut()
        }
    }
}

/// Safe access to the libxml2 functionality used by the binder
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a wrapper, initializing libxml2 on first use.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
            let _ = DEFAULT_ENTITY_LOADER.set(xmlGetExternalEntityLoader());
            xmlSetExternalEntityLoader(Some(catalog_entity_loader));
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Compile the schema at `path`, resolving its external references
    /// through `resolver`.
    ///
    /// Parser diagnostics end up in the error details when compilation fails.
    pub fn compile_schema(
        &self,
        path: &Path,
        resolver: &Arc<CatalogResolver>,
    ) -> LibXml2Result<CompiledSchema> {
        let path_str = path.to_str().ok_or_else(|| LibXml2Error::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let c_path = CString::new(path_str).map_err(|_| LibXml2Error::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let _lock = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _scope = ScopeGuard::enter(ResolutionScope::new(Arc::clone(resolver), path_str));

        let mut diagnostics = ValidationCollector::new();
        let schema_ptr = unsafe {
            let parser_ctxt = xmlSchemaNewParserCtxt(c_path.as_ptr());
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut ValidationCollector as *mut c_void,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);

            // Always free the parser context
            xmlSchemaFreeParserCtxt(parser_ctxt);
            schema_ptr
        };

        if schema_ptr.is_null() {
            let details = diagnostics
                .events()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(LibXml2Error::SchemaParseFailed { details });
        }

        for warning in diagnostics.events() {
            tracing::debug!(schema = %path_str, diagnostic = %warning, "schema compiled with diagnostic");
        }

        let schema = unsafe { XmlSchemaPtr::from_raw(schema_ptr)? };
        Ok(CompiledSchema::new(path_str, schema))
    }

    /// Parse an in-memory instance document without network access.
    pub fn parse_document(&self, xml: &str) -> LibXml2Result<XmlDocument> {
        let size = c_int::try_from(xml.len()).map_err(|_| LibXml2Error::InvalidXml {
            details: "document too large for libxml2".to_string(),
        })?;

        let doc = unsafe {
            xmlResetLastError();
            xmlReadMemory(
                xml.as_ptr() as *const c_char,
                size,
                std::ptr::null(),
                c"UTF-8".as_ptr(),
                DOCUMENT_PARSE_OPTIONS,
            )
        };

        if doc.is_null() {
            let details = unsafe {
                let last = xmlGetLastError();
                if last.is_null() {
                    None
                } else {
                    c_str_opt((*last).message).map(|s| s.trim().to_string())
                }
            }
            .unwrap_or_else(|| "document could not be parsed".to_string());
            return Err(LibXml2Error::InvalidXml { details });
        }

        Ok(XmlDocument { ptr: doc })
    }

    /// Validate a parsed document, appending every diagnostic to `collector`.
    ///
    /// Safe to call concurrently: each call owns its validation context.
    pub fn validate_document(
        &self,
        schema: &CompiledSchema,
        document: &XmlDocument,
        collector: &mut ValidationCollector,
    ) -> LibXml2Result<ValidationResult> {
        let code = unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.schema().as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                collector as *mut ValidationCollector as *mut c_void,
            );

            let code = xmlSchemaValidateDoc(valid_ctxt, document.as_ptr());

            // Always free the validation context
            xmlSchemaFreeValidCtxt(valid_ctxt);
            code
        };

        match ValidationResult::from_code(code) {
            ValidationResult::InternalError { code } => Err(LibXml2Error::InternalError {
                details: format!("xmlSchemaValidateDoc returned {}", code),
            }),
            result => Ok(result),
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogGraphBuilder;
    use tempfile::TempDir;

    const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

    const COUNTER_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="counter">
        <xs:complexType>
            <xs:sequence>
                <xs:element name="a" type="xs:positiveInteger"/>
                <xs:element name="b" type="xs:positiveInteger"/>
            </xs:sequence>
        </xs:complexType>
    </xs:element>
</xs:schema>"#;

    fn write_schema(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn no_catalog() -> Arc<CatalogResolver> {
        Arc::new(CatalogResolver::default())
    }

    #[test]
    fn test_compile_schema_success() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "simple.xsd", SIMPLE_XSD);

        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(&path, &no_catalog()).unwrap();
        assert_eq!(schema.path(), path.to_str().unwrap());
    }

    #[test]
    fn test_compile_invalid_schema() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "broken.xsd", "<invalid>not a schema</invalid>");

        let wrapper = LibXml2Wrapper::new();
        match wrapper.compile_schema(&path, &no_catalog()) {
            Err(LibXml2Error::SchemaParseFailed { details }) => assert!(!details.is_empty()),
            other => panic!("Expected SchemaParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_compiled_schema_identity() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "simple.xsd", SIMPLE_XSD);
        let wrapper = LibXml2Wrapper::new();

        let first = wrapper.compile_schema(&path, &no_catalog()).unwrap();
        let second = wrapper.compile_schema(&path, &no_catalog()).unwrap();
        let clone = first.clone();

        assert_eq!(first, second);
        assert!(!first.ptr_eq(&second));
        assert!(first.ptr_eq(&clone));
    }

    #[test]
    fn test_parse_document() {
        let wrapper = LibXml2Wrapper::new();
        assert!(wrapper.parse_document("<root>Hello World</root>").is_ok());

        match wrapper.parse_document("<a><b></a>") {
            Err(LibXml2Error::InvalidXml { details }) => assert!(!details.is_empty()),
            other => panic!("Expected InvalidXml, got {:?}", other),
        }
    }

    #[test]
    fn test_internal_entities_substituted_before_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "counter.xsd", COUNTER_XSD);
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(&path, &no_catalog()).unwrap();

        let doc = wrapper
            .parse_document(
                r#"<!DOCTYPE counter [<!ENTITY one "1">]><counter><a>&one;</a><b>&one;</b></counter>"#,
            )
            .unwrap();
        let mut collector = ValidationCollector::new();
        let result = wrapper
            .validate_document(&schema, &doc, &mut collector)
            .unwrap();

        assert_eq!(result, ValidationResult::Valid);
        assert!(collector.is_empty(), "{:?}", collector.events());
    }

    #[test]
    fn test_validate_document_collects_events_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "counter.xsd", COUNTER_XSD);
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(&path, &no_catalog()).unwrap();

        let valid = wrapper
            .parse_document("<counter><a>1</a><b>2</b></counter>")
            .unwrap();
        let mut collector = ValidationCollector::new();
        let result = wrapper
            .validate_document(&schema, &valid, &mut collector)
            .unwrap();
        assert_eq!(result, ValidationResult::Valid);
        assert!(collector.is_empty());

        let invalid = wrapper
            .parse_document("<counter>\n<a>-1</a>\n<b>zero</b>\n</counter>")
            .unwrap();
        let mut collector = ValidationCollector::new();
        let result = wrapper
            .validate_document(&schema, &invalid, &mut collector)
            .unwrap();
        assert!(result.is_invalid());

        let events = collector.into_events();
        assert_eq!(events.len(), 2);
        assert!(events[0].message.contains("'a'"));
        assert!(events[1].message.contains("'b'"));
        assert_eq!(events[0].location.map(|l| l.line), Some(2));
        assert_eq!(events[1].location.map(|l| l.line), Some(3));
        assert!(events.iter().all(|e| e.severity == Severity::Error));
    }

    #[test]
    fn test_concurrent_validation_shares_schema() {
        use rayon::prelude::*;

        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "simple.xsd", SIMPLE_XSD);
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(&path, &no_catalog()).unwrap();

        let results: Vec<ValidationResult> = (0..16)
            .into_par_iter()
            .map(|i| {
                let doc = wrapper
                    .parse_document(&format!("<root>value {}</root>", i))
                    .unwrap();
                let mut collector = ValidationCollector::new();
                wrapper
                    .validate_document(&schema, &doc, &mut collector)
                    .unwrap()
            })
            .collect();

        assert!(results.into_iter().all(|r| r == ValidationResult::Valid));
    }

    #[test]
    fn test_import_resolved_through_catalog() {
        let schemas = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();

        let types = elsewhere.path().join("types.xsd");
        fs::write(
            &types,
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:types">
    <xs:simpleType name="Code">
        <xs:restriction base="xs:string"><xs:pattern value="[A-Z]{3}"/></xs:restriction>
    </xs:simpleType>
</xs:schema>"#,
        )
        .unwrap();

        let main = write_schema(
            &schemas,
            "main.xsd",
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:t="urn:example:types">
    <xs:import namespace="urn:example:types" schemaLocation="http://schemas.example.com/types.xsd"/>
    <xs:element name="code" type="t:Code"/>
</xs:schema>"#,
        );

        let mut builder = CatalogGraphBuilder::new();
        let root = builder.add_node();
        builder.public(root, "urn:example:types", types.to_str().unwrap());
        let resolver = Arc::new(CatalogResolver::new(builder.build(root)));

        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper.compile_schema(&main, &resolver).unwrap();

        let doc = wrapper.parse_document("<code>abc</code>").unwrap();
        let mut collector = ValidationCollector::new();
        let result = wrapper
            .validate_document(&schema, &doc, &mut collector)
            .unwrap();
        assert!(result.is_invalid());
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_scan_schema_references() {
        let references = scan_schema_references(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:main">
    <xs:import namespace="urn:other" schemaLocation="other.xsd"/>
    <xs:import namespace="urn:no-location"/>
    <xs:include schemaLocation="part.xsd"/>
</xs:schema>"#,
        );

        assert_eq!(
            references,
            vec![
                SchemaReference {
                    namespace: Some("urn:other".to_string()),
                    schema_location: "other.xsd".to_string(),
                },
                SchemaReference {
                    namespace: Some("urn:main".to_string()),
                    schema_location: "part.xsd".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_route_decisions() {
        let dir = TempDir::new().unwrap();
        let main = write_schema(
            &dir,
            "main.xsd",
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:import namespace="urn:mapped" schemaLocation="http://remote.example.com/mapped.xsd"/>
</xs:schema>"#,
        );
        let main = main.to_str().unwrap();

        let mut builder = CatalogGraphBuilder::new();
        let root = builder.add_node();
        builder.public(root, "urn:mapped", "/local/mapped.xsd");
        let resolver = Arc::new(CatalogResolver::new(builder.build(root)));

        let mut scope = ResolutionScope::new(resolver, main);
        assert_eq!(scope.route(Some(main), None), Route::Default);
        assert_eq!(scope.route(None, None), Route::Default);
        assert_eq!(
            scope.route(Some("http://remote.example.com/mapped.xsd"), None),
            Route::Resolved("/local/mapped.xsd".to_string())
        );
        assert_eq!(
            scope.route(Some("https://unknown.example.com/x.xsd"), None),
            Route::Refused
        );
        assert_eq!(scope.route(Some("/tmp/local.xsd"), None), Route::Default);
    }

    #[test]
    fn test_import_location_miss_falls_back_to_namespace() {
        let dir = TempDir::new().unwrap();
        let main = write_schema(
            &dir,
            "main.xsd",
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:import namespace="urn:mapped" schemaLocation="http://remote.example.com/mapped.xsd"/>
    <xs:import namespace="urn:pinned" schemaLocation="http://remote.example.com/pinned.xsd"/>
    <xs:import namespace="urn:unmapped" schemaLocation="http://remote.example.com/unmapped.xsd"/>
</xs:schema>"#,
        );
        let main = main.to_str().unwrap();

        let mut builder = CatalogGraphBuilder::new();
        let root = builder.add_node();
        builder.public(root, "urn:mapped", "/local/mapped.xsd");
        builder.public(root, "urn:pinned", "/local/by-namespace.xsd");
        builder.system(root, "http://remote.example.com/pinned.xsd", "/local/pinned.xsd");
        let resolver = Arc::new(CatalogResolver::new(builder.build(root)));

        // The plain lookup lets the missed location discard the namespace match.
        let declared = ExternalReference::new()
            .namespace("urn:mapped")
            .system_id("http://remote.example.com/mapped.xsd");
        assert_eq!(resolver.resolve(&declared), None);

        let mut scope = ResolutionScope::new(Arc::clone(&resolver), main);
        assert_eq!(
            scope.route(Some("http://remote.example.com/mapped.xsd"), None),
            Route::Resolved("/local/mapped.xsd".to_string())
        );
        // A location the catalog knows still wins over the namespace entry.
        assert_eq!(
            scope.route(Some("http://remote.example.com/pinned.xsd"), None),
            Route::Resolved("/local/pinned.xsd".to_string())
        );
        assert_eq!(
            scope.route(Some("http://remote.example.com/unmapped.xsd"), None),
            Route::Refused
        );
    }

    #[test]
    fn test_validation_result_from_code() {
        assert_eq!(ValidationResult::from_code(0), ValidationResult::Valid);
        assert_eq!(
            ValidationResult::from_code(5),
            ValidationResult::Invalid { error_count: 5 }
        );
        assert_eq!(
            ValidationResult::from_code(-1),
            ValidationResult::InternalError { code: -1 }
        );
    }
}
