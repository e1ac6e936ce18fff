#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use xml_binder::{Binder, BinderConfig, EnvProvider, XmlRoot};

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.fixtures_dir.join("catalog")
    }

    pub fn xsd_dir(&self) -> PathBuf {
        self.fixtures_dir.join("xsd")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.fixtures_dir.join("config")
    }

    /// Configuration rooted at the fixtures directory with the given catalogs.
    pub fn config(&self, catalogs: &[&str]) -> BinderConfig {
        BinderConfig::default()
            .with_resource_roots([self.fixtures_dir.clone()])
            .with_catalog_paths(catalogs.iter().copied())
    }

    pub fn binder(&self, catalogs: &[&str]) -> Binder {
        Binder::new(self.config(catalogs)).expect("fixture binder should build")
    }
}

impl Default for TestFixtures {
    fn default() -> Self {
        Self::new()
    }
}

pub const PERSON_XSD: &str = "xsd/person.xsd";
pub const FILE_XSD: &str = "xsd/storage/file.xsd";
pub const MAIN_CATALOG: &str = "catalog/catalog.xml";
pub const CYCLE_CATALOG: &str = "catalog/cycle-a.xml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub age: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl XmlRoot for Person {
    const ROOT_ELEMENT: &'static str = "person";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
}

impl XmlRoot for StoredFile {
    const ROOT_ELEMENT: &'static str = "file";
}

/// Declares the same root element as [`Person`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impostor {
    pub name: String,
}

impl XmlRoot for Impostor {
    const ROOT_ELEMENT: &'static str = "person";
}

pub fn person(name: &str, age: i64) -> Person {
    Person {
        name: name.to_string(),
        age,
        email: None,
    }
}

/// Environment provider backed by a fixed set of variables
#[derive(Debug, Default, Clone)]
pub struct MockEnvProvider {
    vars: HashMap<String, String>,
}

impl MockEnvProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl EnvProvider for MockEnvProvider {
    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
