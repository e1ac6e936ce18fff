use std::path::{Path, PathBuf};

/// Locates schema and catalog resources by path.
///
/// Absolute paths are used as-is; relative paths are tried against each
/// search root in order and the first existing file wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    roots: Vec<PathBuf>,
}

impl ResourceLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn locate(&self, resource: &str) -> Option<PathBuf> {
        let resource = resource.trim();
        if resource.is_empty() {
            return None;
        }

        let path = Path::new(resource);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }

        self.roots
            .iter()
            .map(|root| root.join(path))
            .find(|candidate| candidate.is_file())
    }
}

impl Default for ResourceLocator {
    fn default() -> Self {
        Self::new(vec![PathBuf::from(".")])
    }
}
