//! Catalog-based resolution of external schema references.

use std::collections::HashSet;

use crate::catalog::{CatalogGraph, NodeId};

/// Identifiers of an external resource a schema refers to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalReference {
    pub namespace_uri: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub base_uri: Option<String>,
}

impl ExternalReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace_uri: impl Into<String>) -> Self {
        self.namespace_uri = Some(namespace_uri.into());
        self
    }

    pub fn public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    pub fn system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }
}

/// Maps external references to local resource locations through a catalog graph
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    graph: CatalogGraph,
}

impl CatalogResolver {
    pub fn new(graph: CatalogGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &CatalogGraph {
        &self.graph
    }

    /// Resolve `reference` to a location, or `None` when no catalog matches.
    ///
    /// Never fails: a miss is logged and reported as `None`.
    pub fn resolve(&self, reference: &ExternalReference) -> Option<String> {
        tracing::debug!(
            namespace = ?reference.namespace_uri,
            public_id = ?reference.public_id,
            system_id = ?reference.system_id,
            base_uri = ?reference.base_uri,
            "resolving external reference through catalog"
        );

        let mut visited = HashSet::new();
        let resolved = self.resolve_node(self.graph.root(), reference, &mut visited);

        match &resolved {
            Some(location) => tracing::debug!(location = %location, "resolved source with catalog"),
            None => tracing::warn!(
                namespace = ?reference.namespace_uri,
                public_id = ?reference.public_id,
                system_id = ?reference.system_id,
                "no source found with catalog"
            ),
        }

        resolved
    }

    fn resolve_node(
        &self,
        id: NodeId,
        reference: &ExternalReference,
        visited: &mut HashSet<NodeId>,
    ) -> Option<String> {
        // A node reached again through a cycle contributes nothing new.
        if !visited.insert(id) {
            return None;
        }
        let node = self.graph.node(id);

        let mut resolved = None;
        if let Some(namespace) = &reference.namespace_uri {
            resolved = node.match_public(namespace);
        }
        // The system lookup replaces the namespace result, even on a miss.
        if let Some(system_id) = &reference.system_id {
            resolved = node.match_system(system_id);
        }
        if resolved.is_none() {
            if let Some(public_id) = &reference.public_id {
                resolved = node.match_public(public_id);
            }
        }
        if resolved.is_none() {
            if let Some(system_id) = &reference.system_id {
                resolved = node.match_uri(system_id);
            }
        }

        if let Some(location) = resolved {
            return Some(location.to_string());
        }

        node.children()
            .iter()
            .find_map(|&child| self.resolve_node(child, reference, visited))
    }
}
