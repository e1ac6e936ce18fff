//! # xml-binder Library
//!
//! Converts XML text and byte streams to and from strongly-typed values,
//! optionally validating against an XML Schema whose external references are
//! resolved offline through OASIS-style catalogs.
//!
//! Binding contexts and compiled schemas are built once and cached for the
//! lifetime of a [`Binder`]; every failure is reported as one of the
//! [`BinderError`] kinds, with schema problems gathered into a complete,
//! ordered list of [`ValidationEvent`]s.

pub mod binding;
pub mod cache;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod facade;
pub mod libxml2;
pub mod resolver;
pub mod resource;

pub use binding::{
    BindingContext, ContextKey, MarshalSettings, PropertyMap, TypeDescriptor, TypeKey, XmlRoot,
};
pub use cache::{ContextCache, ProcessCache, SchemaCache};
pub use catalog::{CatalogGraph, CatalogGraphBuilder, CatalogNode, NodeId};
pub use classifier::{EngineFailure, ErrorClassifier, PassKind, abbreviate};
pub use config::{BinderConfig, ConfigManager, EnvProvider, PropertyStore, SystemEnvProvider};
pub use error::{BinderError, ConfigError, LibXml2Error, Result};
pub use event::{EventLocation, Severity, ValidationCollector, ValidationEvent};
pub use facade::Binder;
pub use libxml2::{CompiledSchema, LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use resolver::{CatalogResolver, ExternalReference};
pub use resource::ResourceLocator;
