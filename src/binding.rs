//! Type <-> XML mapping on top of quick-xml's serde support.
//!
//! A type takes part in binding by implementing [`XmlRoot`]. A
//! [`BindingContext`] is built once per normalized set of types and cached by
//! the facade; it knows each type's root element and checks that a document
//! actually is the type being requested.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::sync::OnceLock;

use quick_xml::Reader;
use quick_xml::de::{DeError, Deserializer, EntityResolver};
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesText, Event};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::classifier::EngineFailure;
use crate::error::{BinderError, Result, into_cause};

pub const ENCODING: &str = "xmlbinder.encoding";
pub const FORMATTED_OUTPUT: &str = "xmlbinder.formatted.output";
pub const INDENT: &str = "xmlbinder.indent";
pub const FRAGMENT: &str = "xmlbinder.fragment";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Raw marshaller properties as supplied by callers
pub type PropertyMap = BTreeMap<String, Value>;

static XML_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static ENTITY_DECL_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_xml_name_regex() -> &'static Regex {
    XML_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][\w.\-]*:)?[A-Za-z_][\w.\-]*$")
            .expect("Failed to compile XML name regex")
    })
}

fn get_entity_decl_regex() -> &'static Regex {
    ENTITY_DECL_REGEX.get_or_init(|| {
        Regex::new(r#"<!ENTITY\s+([^\s%]+)\s+(?:"([^"]*)"|'([^']*)')\s*>"#)
            .expect("Failed to compile entity declaration regex")
    })
}

/// Expands general entities declared in the document's internal subset.
///
/// External (`SYSTEM`/`PUBLIC`) and parameter entities are never captured, so
/// references to them stay unresolved.
#[derive(Debug, Default)]
struct InternalSubsetEntities {
    entities: HashMap<String, String>,
}

impl EntityResolver for InternalSubsetEntities {
    type Error = Infallible;

    fn capture(&mut self, doctype: BytesText) -> std::result::Result<(), Self::Error> {
        let declarations = String::from_utf8_lossy(&doctype);
        for caps in get_entity_decl_regex().captures_iter(&declarations) {
            let literal = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            let value = unescape(literal).map_or_else(|_| literal.to_string(), Cow::into_owned);
            // The first declaration of an entity is binding.
            self.entities.entry(caps[1].to_string()).or_insert(value);
        }
        Ok(())
    }

    fn resolve(&self, entity: &str) -> Option<&str> {
        resolve_predefined_entity(entity)
            .or_else(|| self.entities.get(entity).map(String::as_str))
    }
}

/// A type that can be bound to and from an XML document.
pub trait XmlRoot: Serialize + DeserializeOwned + 'static {
    /// Name of the document element this type maps to.
    const ROOT_ELEMENT: &'static str;
}

/// Stable identifier of a bindable type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Everything the binding context needs to know about one type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    key: TypeKey,
    root_element: &'static str,
}

impl TypeDescriptor {
    pub fn of<T: XmlRoot>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            root_element: T::ROOT_ELEMENT,
        }
    }

    pub fn new(key: TypeKey, root_element: &'static str) -> Self {
        Self { key, root_element }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn root_element(&self) -> &'static str {
        self.root_element
    }
}

/// Cache key for a binding context: the sorted, deduplicated type set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(Vec<TypeKey>);

impl ContextKey {
    pub fn from_types(types: &[TypeDescriptor]) -> Self {
        let mut keys: Vec<TypeKey> = types.iter().map(TypeDescriptor::key).collect();
        keys.sort_unstable();
        keys.dedup();
        ContextKey(keys)
    }

    pub fn types(&self) -> &[TypeKey] {
        &self.0
    }
}

/// Configuration problems found while building a context
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("type {key} declares an invalid root element name '{name}'")]
    InvalidRootName { key: TypeKey, name: String },

    #[error("root element <{name}> is declared by both {first} and {second}")]
    ConflictingRoot {
        name: String,
        first: TypeKey,
        second: TypeKey,
    },

    #[error("type {key} is not part of this binding context")]
    UnknownType { key: TypeKey },

    #[error("unexpected element <{found}>, expected <{expected}>")]
    UnexpectedElement { found: String, expected: String },

    #[error("character U+{code:04X} is not allowed in XML 1.0 documents")]
    IllegalCharacter { code: u32 },
}

/// Well-formedness problems found by the structural scan
#[derive(Error, Debug)]
pub enum StructureError {
    #[error("XML syntax error at position {position}: {message}")]
    Syntax { position: String, message: String },

    #[error("XML document structures must start and end within the same entity: <{name}> is not closed")]
    UnclosedElement { name: String },

    #[error("Premature end of file: no root element")]
    MissingRoot,

    #[error("the markup following the root element must be well-formed: second root <{name}>")]
    MultipleRoots { name: String },

    #[error("content is not allowed outside the root element")]
    TextOutsideRoot,

    #[error("input is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

/// Compiled knowledge of how to map a set of types to and from XML
#[derive(Debug)]
pub struct BindingContext {
    types: Vec<TypeDescriptor>,
}

impl BindingContext {
    /// Build a context for `types`.
    ///
    /// Fails when a root element name is not a valid XML name or when two
    /// distinct types claim the same root element.
    pub fn new(types: &[TypeDescriptor]) -> Result<Self> {
        let mut descriptors: Vec<TypeDescriptor> = types.to_vec();
        descriptors.sort_unstable_by_key(TypeDescriptor::key);
        descriptors.dedup_by_key(|d| d.key());

        let mut by_root = HashMap::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            if !get_xml_name_regex().is_match(descriptor.root_element()) {
                return Err(context_failure(ContextError::InvalidRootName {
                    key: descriptor.key(),
                    name: descriptor.root_element().to_string(),
                }));
            }
            if let Some(first) = by_root.insert(descriptor.root_element(), descriptor.key()) {
                return Err(context_failure(ContextError::ConflictingRoot {
                    name: descriptor.root_element().to_string(),
                    first,
                    second: descriptor.key(),
                }));
            }
        }

        Ok(Self { types: descriptors })
    }

    pub fn root_element_of(&self, key: TypeKey) -> Option<&'static str> {
        self.types
            .iter()
            .find(|d| d.key() == key)
            .map(TypeDescriptor::root_element)
    }

    /// Deserialize a document whose root element (already scanned) is `root`.
    pub fn unmarshal<T: XmlRoot>(
        &self,
        xml: &str,
        root: &str,
    ) -> std::result::Result<T, EngineFailure> {
        let expected = self.expected_root::<T>()?;
        if local_part(expected) != local_part(root) {
            return Err(EngineFailure::Provider(into_cause(
                ContextError::UnexpectedElement {
                    found: root.to_string(),
                    expected: expected.to_string(),
                },
            )));
        }

        let mut deserializer =
            Deserializer::from_str_with_resolver(xml, InternalSubsetEntities::default());
        T::deserialize(&mut deserializer).map_err(|e| match e {
            DeError::InvalidXml(_) => EngineFailure::Structural(into_cause(e)),
            other => EngineFailure::Provider(into_cause(other)),
        })
    }

    /// Serialize `value` under its declared root element.
    pub fn marshal<T: XmlRoot>(
        &self,
        value: &T,
        settings: &MarshalSettings,
    ) -> std::result::Result<String, EngineFailure> {
        let root = self.expected_root::<T>()?;

        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::with_root(&mut body, Some(root))
            .map_err(|e| EngineFailure::Provider(into_cause(e)))?;
        if settings.formatted_output {
            serializer.indent(' ', settings.indent);
        }
        value
            .serialize(serializer)
            .map_err(|e| EngineFailure::Provider(into_cause(e)))?;
        if let Some(c) = body.chars().find(|c| !is_xml_char(*c)) {
            return Err(EngineFailure::Provider(into_cause(
                ContextError::IllegalCharacter { code: c as u32 },
            )));
        }

        let mut document = String::with_capacity(body.len() + XML_DECLARATION.len() + 1);
        if !settings.fragment {
            document.push_str(XML_DECLARATION);
            if settings.formatted_output {
                document.push('\n');
            }
        }
        document.push_str(&body);
        Ok(document)
    }

    fn expected_root<T: XmlRoot>(&self) -> std::result::Result<&'static str, EngineFailure> {
        let key = TypeKey::of::<T>();
        self.root_element_of(key)
            .ok_or_else(|| EngineFailure::Provider(into_cause(ContextError::UnknownType { key })))
    }
}

fn context_failure(err: ContextError) -> BinderError {
    BinderError::binding(
        format!("Binding context creation failed: {}", err),
        Some(into_cause(err)),
    )
}

/// `Char` production of XML 1.0; surrogates cannot occur in a `char`.
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{FFFD}' | '\u{10000}'..)
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Check that `xml` is well-formed and return the name of its root element.
///
/// This is a pure structure pass: no schema, no type knowledge.
pub fn scan_structure(xml: &str) -> std::result::Result<String, EngineFailure> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = true;

    let mut open: Vec<String> = Vec::new();
    let mut root: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if open.is_empty() {
                    claim_root(&mut root, &name)?;
                }
                open.push(name);
            }
            Ok(Event::Empty(e)) => {
                if open.is_empty() {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    claim_root(&mut root, &name)?;
                }
            }
            Ok(Event::End(_)) => {
                open.pop();
            }
            Ok(Event::Text(text)) if open.is_empty() => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(structural(StructureError::TextOutsideRoot));
                }
            }
            Ok(Event::CData(_)) if open.is_empty() => {
                return Err(structural(StructureError::TextOutsideRoot));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(structural(StructureError::Syntax {
                    position: reader.error_position().to_string(),
                    message: e.to_string(),
                }));
            }
        }
    }

    if let Some(name) = open.pop() {
        return Err(structural(StructureError::UnclosedElement { name }));
    }

    root.ok_or_else(|| structural(StructureError::MissingRoot))
}

fn claim_root(root: &mut Option<String>, name: &str) -> std::result::Result<(), EngineFailure> {
    if root.is_some() {
        return Err(structural(StructureError::MultipleRoots {
            name: name.to_string(),
        }));
    }
    *root = Some(name.to_string());
    Ok(())
}

fn structural(err: StructureError) -> EngineFailure {
    EngineFailure::Structural(into_cause(err))
}

/// Effective marshaller settings after applying caller properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalSettings {
    pub formatted_output: bool,
    pub indent: usize,
    pub fragment: bool,
}

impl Default for MarshalSettings {
    fn default() -> Self {
        Self {
            formatted_output: true,
            indent: 4,
            fragment: false,
        }
    }
}

impl MarshalSettings {
    /// Apply caller properties on top of the defaults (UTF-8, formatted output).
    pub fn from_properties(properties: Option<&PropertyMap>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(properties) = properties {
            for (name, value) in properties {
                settings.set(name, value)?;
            }
        }
        Ok(settings)
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            ENCODING => match value.as_str() {
                Some(enc) if enc.eq_ignore_ascii_case("UTF-8") || enc.eq_ignore_ascii_case("UTF8") => {
                    Ok(())
                }
                _ => Err(bad_property(name, value, "only UTF-8 output is supported")),
            },
            FORMATTED_OUTPUT => {
                self.formatted_output = value
                    .as_bool()
                    .ok_or_else(|| bad_property(name, value, "expected a boolean"))?;
                Ok(())
            }
            INDENT => {
                let indent = value
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| bad_property(name, value, "expected a non-negative integer"))?;
                self.indent = indent;
                Ok(())
            }
            FRAGMENT => {
                self.fragment = value
                    .as_bool()
                    .ok_or_else(|| bad_property(name, value, "expected a boolean"))?;
                Ok(())
            }
            _ => Err(bad_property(name, value, "unknown property")),
        }
    }
}

fn bad_property(name: &str, value: &Value, reason: &str) -> BinderError {
    BinderError::invalid_argument(format!(
        "Failed to set property name[{}], value[{}]: [{}]",
        name, value, reason
    ))
}
