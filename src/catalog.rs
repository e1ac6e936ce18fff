//! In-memory OASIS catalog graph.
//!
//! Catalog files are read once, eagerly, into an arena of [`CatalogNode`]s.
//! Each node keeps its `public`, `system` and `uri` tables plus the ordered
//! list of catalogs it delegates to. A `nextCatalog` pointing at a file that
//! is already loaded reuses that file's node, so cyclic chains are stored as
//! cycles rather than unrolled.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use thiserror::Error;

use crate::error::{BinderError, Result, into_cause};
use crate::resource::ResourceLocator;

static URI_SCHEME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_uri_scheme_regex() -> &'static Regex {
    // Two or more scheme characters, so Windows drive letters are not schemes.
    URI_SCHEME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]+:").expect("Failed to compile URI scheme regex")
    })
}

/// Index of a node inside a [`CatalogGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Problems reading a single catalog file
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog {path} is not well-formed at position {position}: {message}")]
    Syntax {
        path: PathBuf,
        position: String,
        message: String,
    },

    #[error("<{element}> in catalog {path} is missing the '{attribute}' attribute")]
    MissingAttribute {
        path: PathBuf,
        element: String,
        attribute: &'static str,
    },

    #[error("catalog {path} delegates to unsupported location '{location}'")]
    UnsupportedLocation { path: PathBuf, location: String },
}

/// One catalog: three lookup tables and its delegates
#[derive(Debug, Clone, Default)]
pub struct CatalogNode {
    source: Option<PathBuf>,
    public: HashMap<String, String>,
    system: HashMap<String, String>,
    uri: HashMap<String, String>,
    children: Vec<NodeId>,
}

impl CatalogNode {
    /// File the node was loaded from; `None` for the synthetic root and
    /// nodes built in code.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn match_public(&self, public_id: &str) -> Option<&str> {
        self.public
            .get(&normalize_public_id(public_id))
            .map(String::as_str)
    }

    pub fn match_system(&self, system_id: &str) -> Option<&str> {
        self.system.get(system_id).map(String::as_str)
    }

    pub fn match_uri(&self, uri: &str) -> Option<&str> {
        self.uri.get(uri).map(String::as_str)
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn entry_count(&self) -> usize {
        self.public.len() + self.system.len() + self.uri.len()
    }

    // First declaration wins, as catalog entries are matched in document order.
    fn add_public(&mut self, public_id: &str, location: String) {
        self.public
            .entry(normalize_public_id(public_id))
            .or_insert(location);
    }

    fn add_system(&mut self, system_id: &str, location: String) {
        self.system.entry(system_id.to_string()).or_insert(location);
    }

    fn add_uri(&mut self, name: &str, location: String) {
        self.uri.entry(name.to_string()).or_insert(location);
    }
}

/// Read-only catalog graph with a single entry node
#[derive(Debug, Clone)]
pub struct CatalogGraph {
    nodes: Vec<CatalogNode>,
    root: NodeId,
}

impl CatalogGraph {
    /// A graph with only an empty root; every lookup misses.
    pub fn empty() -> Self {
        let mut builder = CatalogGraphBuilder::new();
        let root = builder.add_node();
        builder.build(root)
    }

    /// Load every catalog in `paths`, plus everything they reference through
    /// `nextCatalog`, under a synthetic root that lists them in order.
    ///
    /// A path the locator cannot find is `ResourceNotFound`; a file that
    /// cannot be read or parsed is a `Binding` error.
    pub fn load<S: AsRef<str>>(paths: &[S], locator: &ResourceLocator) -> Result<Self> {
        let mut loader = CatalogLoader::new();
        let root = loader.builder.add_node();

        for path in paths {
            let path = path.as_ref();
            let located = locator
                .locate(path)
                .ok_or_else(|| BinderError::resource_not_found(path))?;
            let child = loader.load_file(&located)?;
            loader.builder.add_child(root, child);
        }

        let graph = loader.builder.build(root);
        tracing::info!(
            catalogs = paths.len(),
            nodes = graph.len(),
            "catalog graph loaded"
        );
        Ok(graph)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Panics if `id` was not produced for this graph.
    pub fn node(&self, id: NodeId) -> &CatalogNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&CatalogNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1 && self.node(self.root).entry_count() == 0
    }
}

impl Default for CatalogGraph {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builds a [`CatalogGraph`] node by node
#[derive(Debug, Default)]
pub struct CatalogGraphBuilder {
    nodes: Vec<CatalogNode>,
}

impl CatalogGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self) -> NodeId {
        self.push(CatalogNode::default())
    }

    fn add_source_node(&mut self, source: PathBuf) -> NodeId {
        self.push(CatalogNode {
            source: Some(source),
            ..CatalogNode::default()
        })
    }

    fn push(&mut self, node: CatalogNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn public(&mut self, id: NodeId, public_id: &str, location: &str) -> &mut Self {
        self.nodes[id.0].add_public(public_id, location.to_string());
        self
    }

    pub fn system(&mut self, id: NodeId, system_id: &str, location: &str) -> &mut Self {
        self.nodes[id.0].add_system(system_id, location.to_string());
        self
    }

    pub fn uri(&mut self, id: NodeId, name: &str, location: &str) -> &mut Self {
        self.nodes[id.0].add_uri(name, location.to_string());
        self
    }

    /// Append `child` to `parent`'s delegates. Cycles are allowed.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> &mut Self {
        self.nodes[parent.0].children.push(child);
        self
    }

    pub fn build(self, root: NodeId) -> CatalogGraph {
        CatalogGraph {
            nodes: self.nodes,
            root,
        }
    }
}

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_public_id(public_id: &str) -> String {
    public_id.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct CatalogLoader {
    builder: CatalogGraphBuilder,
    loaded: HashMap<PathBuf, NodeId>,
}

impl CatalogLoader {
    fn new() -> Self {
        Self {
            builder: CatalogGraphBuilder::new(),
            loaded: HashMap::new(),
        }
    }

    fn load_file(&mut self, path: &Path) -> Result<NodeId> {
        let canonical = fs::canonicalize(path).map_err(|source| {
            catalog_failure(CatalogError::Read {
                path: path.to_path_buf(),
                source,
            })
        })?;

        if let Some(&id) = self.loaded.get(&canonical) {
            return Ok(id);
        }

        // Registered before parsing so a cycle back to this file finds it.
        let id = self.builder.add_source_node(canonical.clone());
        self.loaded.insert(canonical.clone(), id);

        let content = fs::read_to_string(&canonical).map_err(|source| {
            catalog_failure(CatalogError::Read {
                path: canonical.clone(),
                source,
            })
        })?;

        let parsed = parse_catalog(&content, &canonical).map_err(catalog_failure)?;
        tracing::debug!(
            catalog = %canonical.display(),
            entries = parsed.entries.len(),
            delegates = parsed.next_catalogs.len(),
            "catalog parsed"
        );

        for entry in parsed.entries {
            let node = &mut self.builder.nodes[id.0];
            match entry {
                CatalogEntry::Public {
                    public_id,
                    location,
                } => node.add_public(&public_id, location),
                CatalogEntry::System {
                    system_id,
                    location,
                } => node.add_system(&system_id, location),
                CatalogEntry::Uri { name, location } => node.add_uri(&name, location),
            }
        }

        for next in parsed.next_catalogs {
            let next_path = local_path(&next).ok_or_else(|| {
                catalog_failure(CatalogError::UnsupportedLocation {
                    path: canonical.clone(),
                    location: next.clone(),
                })
            })?;
            if !next_path.is_file() {
                return Err(BinderError::resource_not_found(next_path.display().to_string()));
            }
            let child = self.load_file(&next_path)?;
            self.builder.add_child(id, child);
        }

        Ok(id)
    }
}

fn catalog_failure(err: CatalogError) -> BinderError {
    BinderError::binding(
        format!("Catalog loading failed: {}", err),
        Some(into_cause(err)),
    )
}

#[derive(Debug, PartialEq, Eq)]
enum CatalogEntry {
    Public { public_id: String, location: String },
    System { system_id: String, location: String },
    Uri { name: String, location: String },
}

#[derive(Debug, Default)]
struct ParsedCatalog {
    entries: Vec<CatalogEntry>,
    next_catalogs: Vec<String>,
}

fn parse_catalog(content: &str, path: &Path) -> std::result::Result<ParsedCatalog, CatalogError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().check_end_names = true;

    let file_base = path
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut bases: Vec<String> = vec![file_base];
    let mut parsed = ParsedCatalog::default();

    loop {
        let event = reader.read_event().map_err(|e| CatalogError::Syntax {
            path: path.to_path_buf(),
            position: reader.error_position().to_string(),
            message: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                let base = current_base(&bases);
                let attributes = read_attributes(&e, path, reader.buffer_position() as u64)?;
                let effective = attributes
                    .get("xml:base")
                    .map(|b| resolve_location(&base, b))
                    .unwrap_or(base);
                handle_entry(&e, &attributes, &effective, path, &mut parsed)?;
                bases.push(effective);
            }
            Event::Empty(e) => {
                let base = current_base(&bases);
                let attributes = read_attributes(&e, path, reader.buffer_position() as u64)?;
                let effective = attributes
                    .get("xml:base")
                    .map(|b| resolve_location(&base, b))
                    .unwrap_or(base);
                handle_entry(&e, &attributes, &effective, path, &mut parsed)?;
            }
            Event::End(_) => {
                bases.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(parsed)
}

fn current_base(bases: &[String]) -> String {
    bases.last().cloned().unwrap_or_default()
}

fn read_attributes(
    element: &BytesStart<'_>,
    path: &Path,
    position: u64,
) -> std::result::Result<HashMap<String, String>, CatalogError> {
    let syntax = |message: String| CatalogError::Syntax {
        path: path.to_path_buf(),
        position: position.to_string(),
        message,
    };

    let mut attributes = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| syntax(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| syntax(format!("Invalid attribute value: {}", e)))?;
        attributes.insert(key, value.into_owned());
    }
    Ok(attributes)
}

fn handle_entry(
    element: &BytesStart<'_>,
    attributes: &HashMap<String, String>,
    base: &str,
    path: &Path,
    parsed: &mut ParsedCatalog,
) -> std::result::Result<(), CatalogError> {
    let local_name = element.local_name();
    let element_name = String::from_utf8_lossy(local_name.as_ref()).into_owned();

    let required = |attribute: &'static str| {
        attributes
            .get(attribute)
            .ok_or_else(|| CatalogError::MissingAttribute {
                path: path.to_path_buf(),
                element: element_name.clone(),
                attribute,
            })
    };

    match element_name.as_str() {
        "public" => parsed.entries.push(CatalogEntry::Public {
            public_id: required("publicId")?.clone(),
            location: resolve_location(base, required("uri")?),
        }),
        "system" => parsed.entries.push(CatalogEntry::System {
            system_id: required("systemId")?.clone(),
            location: resolve_location(base, required("uri")?),
        }),
        "uri" => parsed.entries.push(CatalogEntry::Uri {
            name: required("name")?.clone(),
            location: resolve_location(base, required("uri")?),
        }),
        "nextCatalog" => parsed
            .next_catalogs
            .push(resolve_location(base, required("catalog")?)),
        _ => {}
    }

    Ok(())
}

pub(crate) fn has_uri_scheme(value: &str) -> bool {
    get_uri_scheme_regex().is_match(value)
}

/// Resolve `value` against `base`. Absolute paths and values carrying a URI
/// scheme are returned as written; `base` is treated as a directory.
pub fn resolve_location(base: &str, value: &str) -> String {
    let value = value.trim();
    if has_uri_scheme(value) || Path::new(value).is_absolute() || base.is_empty() {
        return value.to_string();
    }

    if has_uri_scheme(base) {
        return format!("{}/{}", base.trim_end_matches('/'), value);
    }

    Path::new(base).join(value).to_string_lossy().into_owned()
}

/// Filesystem path for a catalog location: plain paths and `file:` URIs.
fn local_path(location: &str) -> Option<PathBuf> {
    if let Some(rest) = location.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = location.strip_prefix("file:") {
        return Some(PathBuf::from(rest));
    }
    if has_uri_scheme(location) {
        return None;
    }
    Some(PathBuf::from(location))
}
