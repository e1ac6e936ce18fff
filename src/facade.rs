//! The binding facade: one entry point for bind, unbind and schema work.

use std::io::Read;
use std::sync::Arc;

use crate::binding::{
    BindingContext, ContextKey, MarshalSettings, PropertyMap, StructureError, TypeDescriptor,
    TypeKey, XmlRoot, scan_structure,
};
use crate::cache::{ContextCache, SchemaCache};
use crate::catalog::CatalogGraph;
use crate::classifier::{EngineFailure, ErrorClassifier, PassKind};
use crate::config::{BinderConfig, ConfigManager};
use crate::error::{BinderError, Result, into_cause};
use crate::event::{Severity, ValidationCollector, ValidationEvent};
use crate::libxml2::{CompiledSchema, LibXml2Wrapper};
use crate::resolver::{CatalogResolver, ExternalReference};
use crate::resource::ResourceLocator;

/// Converts XML to and from typed values, optionally validating against a
/// catalog-resolved XML Schema.
///
/// A `Binder` is `Send + Sync`; share one (for example behind an `Arc`) so
/// that its context and schema caches are reused across calls.
pub struct Binder {
    config: BinderConfig,
    locator: ResourceLocator,
    resolver: Arc<CatalogResolver>,
    contexts: ContextCache,
    schemas: SchemaCache,
    libxml2: LibXml2Wrapper,
    classifier: ErrorClassifier,
}

impl Binder {
    /// Build a binder, eagerly loading every configured catalog.
    ///
    /// Fails with `ResourceNotFound` when a catalog cannot be located and with
    /// `Binding` when one cannot be read or parsed.
    pub fn new(config: BinderConfig) -> Result<Self> {
        ConfigManager::validate_config(&config)?;

        let locator = ResourceLocator::new(config.resource_roots.clone());
        let graph = CatalogGraph::load(&config.catalog_paths, &locator)?;

        Ok(Self {
            locator,
            resolver: Arc::new(CatalogResolver::new(graph)),
            contexts: ContextCache::new("binding-contexts"),
            schemas: SchemaCache::new("compiled-schemas"),
            libxml2: LibXml2Wrapper::new(),
            classifier: ErrorClassifier::new(config.message_limit),
            config,
        })
    }

    /// Build a binder from the process environment.
    pub fn from_environment() -> Result<Self> {
        Self::new(ConfigManager::from_environment()?)
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    pub fn resolver(&self) -> &CatalogResolver {
        &self.resolver
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    pub fn context_cache(&self) -> &ContextCache {
        &self.contexts
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schemas
    }

    /// Binding context for `types`, built once per distinct type set.
    pub fn get_context(&self, types: &[TypeDescriptor]) -> Result<Arc<BindingContext>> {
        if types.is_empty() {
            return Err(BinderError::invalid_argument("type set cannot be empty"));
        }

        let key = ContextKey::from_types(types);
        self.contexts.get_or_try_insert_with(key.clone(), || {
            tracing::debug!(types = ?key.types(), "building binding context");
            BindingContext::new(types).map(Arc::new)
        })
    }

    /// Compiled schema for the resource at `path`, compiled once per path.
    pub fn get_schema(&self, path: &str) -> Result<CompiledSchema> {
        let path = path.trim();
        if path.is_empty() {
            return Err(BinderError::invalid_argument("xsd path cannot be blank"));
        }

        self.schemas.get_or_try_insert_with(path.to_string(), || {
            let located = self
                .locator
                .locate(path)
                .ok_or_else(|| BinderError::resource_not_found(path))?;

            tracing::debug!(schema = %path, location = %located.display(), "compiling schema");
            self.libxml2
                .compile_schema(&located, &self.resolver)
                .map_err(|e| {
                    BinderError::binding(
                        format!("Unexpected error during schema creation for XSD: [{}]", path),
                        Some(into_cause(e)),
                    )
                })
        })
    }

    /// Bind XML text to a value of `T`.
    ///
    /// Blank input yields `Ok(None)`. With `schema_path`, the document is
    /// validated first and every problem found is reported together.
    pub fn bind<T: XmlRoot>(&self, xml: &str, schema_path: Option<&str>) -> Result<Option<T>> {
        if xml.trim().is_empty() {
            return Ok(None);
        }

        let context = self.get_context(&[TypeDescriptor::of::<T>()])?;
        let schema = schema_path.map(|path| self.get_schema(path)).transpose()?;

        let mut collector = ValidationCollector::new();
        let outcome = self.bind_pass::<T>(&context, xml, schema.as_ref(), &mut collector);

        self.classifier.classify(
            outcome.map(Some),
            collector.into_events(),
            PassKind::Bind {
                type_name: TypeKey::of::<T>().as_str(),
                input: xml,
            },
        )
    }

    /// Bind a UTF-8 byte stream to a value of `T`.
    pub fn bind_reader<T: XmlRoot, R: Read>(
        &self,
        mut reader: R,
        schema_path: Option<&str>,
    ) -> Result<Option<T>> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|e| {
            BinderError::binding(
                format!("Failed to read XML input for type [{}]: {}", TypeKey::of::<T>(), e),
                Some(into_cause(e)),
            )
        })?;

        let xml = std::str::from_utf8(&bytes).map_err(|e| {
            BinderError::malformed_input(Vec::new(), into_cause(StructureError::Encoding(e)))
        })?;

        self.bind(xml, schema_path)
    }

    /// Serialize `value` to XML text.
    ///
    /// `None` yields `Ok(None)`. With `schema_path`, the produced document is
    /// validated and any problem is reported as a schema violation.
    pub fn unbind<T: XmlRoot>(
        &self,
        value: Option<&T>,
        schema_path: Option<&str>,
        properties: Option<&PropertyMap>,
    ) -> Result<Option<String>> {
        let Some(value) = value else {
            return Ok(None);
        };

        let settings = MarshalSettings::from_properties(properties)?;
        let context = self.get_context(&[TypeDescriptor::of::<T>()])?;
        let schema = schema_path.map(|path| self.get_schema(path)).transpose()?;

        let mut collector = ValidationCollector::new();
        let outcome = context.marshal(value, &settings).and_then(|xml| {
            if let Some(schema) = &schema {
                // Output that libxml2 cannot read back is a marshalling fault.
                self.validate_text(schema, &xml, &mut collector)
                    .map_err(|failure| match failure {
                        EngineFailure::Structural(cause) => EngineFailure::Provider(cause),
                        other => other,
                    })?;
            }
            Ok(xml)
        });

        self.classifier.classify(
            outcome.map(Some),
            collector.into_events(),
            PassKind::Unbind {
                type_name: TypeKey::of::<T>().as_str(),
            },
        )
    }

    /// Resolve an external reference through the configured catalogs.
    pub fn resolve(&self, reference: &ExternalReference) -> Option<String> {
        self.resolver.resolve(reference)
    }

    fn bind_pass<T: XmlRoot>(
        &self,
        context: &BindingContext,
        xml: &str,
        schema: Option<&CompiledSchema>,
        collector: &mut ValidationCollector,
    ) -> std::result::Result<T, EngineFailure> {
        let root = scan_structure(xml)?;
        if let Some(schema) = schema {
            self.validate_text(schema, xml, collector)?;
        }
        context.unmarshal::<T>(xml, &root)
    }

    fn validate_text(
        &self,
        schema: &CompiledSchema,
        xml: &str,
        collector: &mut ValidationCollector,
    ) -> std::result::Result<(), EngineFailure> {
        let document = self
            .libxml2
            .parse_document(xml)
            .map_err(|e| EngineFailure::Structural(into_cause(e)))?;

        let result = self
            .libxml2
            .validate_document(schema, &document, collector)
            .map_err(|e| EngineFailure::Provider(into_cause(e)))?;
        if result.is_invalid() && collector.is_empty() {
            collector.handle_event(ValidationEvent::new(
                Severity::Error,
                "document is not valid against the schema",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    impl XmlRoot for Greeting {
        const ROOT_ELEMENT: &'static str = "greeting";
    }

    fn binder() -> Binder {
        Binder::new(BinderConfig::default()).unwrap()
    }

    #[test]
    fn test_blank_and_null_inputs() {
        let binder = binder();
        assert_eq!(binder.bind::<Greeting>("", None).unwrap(), None);
        assert_eq!(binder.bind::<Greeting>("  \n\t", None).unwrap(), None);
        assert_eq!(binder.unbind::<Greeting>(None, None, None).unwrap(), None);
        assert_eq!(
            binder
                .bind_reader::<Greeting, _>(std::io::empty(), None)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_round_trip_without_schema() {
        let binder = binder();
        let greeting = Greeting {
            text: "hello".to_string(),
        };

        let xml = binder.unbind(Some(&greeting), None, None).unwrap().unwrap();
        let back: Greeting = binder.bind(&xml, None).unwrap().unwrap();
        assert_eq!(back, greeting);
    }

    #[test]
    fn test_get_context_rejects_empty_type_set() {
        let err = binder().get_context(&[]).unwrap_err();
        assert!(matches!(err, BinderError::InvalidArgument { .. }));
    }

    #[test]
    fn test_get_schema_argument_checks() {
        let binder = binder();
        assert!(matches!(
            binder.get_schema("   "),
            Err(BinderError::InvalidArgument { .. })
        ));
        assert!(matches!(
            binder.get_schema("xsd/does-not-exist.xsd"),
            Err(BinderError::ResourceNotFound { .. })
        ));
        assert_eq!(binder.schema_cache().entry_count(), 0);
    }

    #[test]
    fn test_non_utf8_stream_is_malformed() {
        let bytes: &[u8] = &[b'<', b'a', b'>', 0xff, 0xfe, b'<', b'/', b'a', b'>'];
        let err = binder()
            .bind_reader::<Greeting, _>(bytes, None)
            .unwrap_err();
        assert!(matches!(err, BinderError::MalformedInput { .. }));
    }

    #[test]
    fn test_failing_reader_is_binding_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("connection reset"))
            }
        }

        let err = binder()
            .bind_reader::<Greeting, _>(Broken, None)
            .unwrap_err();
        match err {
            BinderError::Binding { message, cause } => {
                assert!(message.contains("connection reset"));
                assert!(cause.is_some());
            }
            other => panic!("Expected Binding, got {:?}", other),
        }
    }

    #[test]
    fn test_binder_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Binder>();
    }
}
