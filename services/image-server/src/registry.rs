//! Route registry.
//!
//! Maps HTTP routes derived from content digests to inspected sources.
//! Built once at startup and read-only afterwards; the first source to
//! claim a route keeps it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::StartupError;
use crate::inspect::{Inspector, SourceDescriptor, SourceKind};

/// Outcome of registering a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The source is now served on `route`.
    Bound { route: String },
    /// Another source already owns `route`; nothing was changed.
    Duplicate { route: String, existing: PathBuf },
}

/// Derive the route for a digest.
///
/// Joins `/`, the prefix and the digest, then cleans the result the way a
/// URL path is cleaned: repeated slashes collapse, `.` segments vanish and
/// `..` removes the previous segment without climbing above the root.
pub fn route_for(url_prefix: &str, digest: &str) -> String {
    clean_path(&format!("/{url_prefix}/{digest}"))
}

fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Immutable-after-startup mapping from route to source.
#[derive(Debug, Default)]
pub struct Registry {
    /// Sources in registration order.
    entries: Vec<(String, SourceDescriptor)>,
    /// Index into `entries` by route.
    by_route: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect every source in order and register it.
    ///
    /// Any source that cannot be opened or read aborts the whole build, as
    /// does a source whose size cannot be determined. Duplicates are skipped.
    pub fn build<P: AsRef<Path>>(
        sources: &[P],
        url_prefix: &str,
        inspector: &Inspector,
    ) -> Result<Self, StartupError> {
        if sources.is_empty() {
            return Err(StartupError::NoSources);
        }

        let mut registry = Self::new();

        for source in sources {
            let source = source.as_ref();
            info!(source = %source.display(), "Processing source");

            let descriptor = inspector.inspect(source)?;
            if descriptor.kind == SourceKind::Unknown {
                return Err(StartupError::Unclassified {
                    path: descriptor.path,
                });
            }

            let kind = descriptor.kind;
            let length = descriptor.length;
            match registry.register(descriptor, url_prefix) {
                Registration::Bound { route } => {
                    info!(
                        source = %source.display(),
                        kind = %kind,
                        length = length,
                        route = %route,
                        "Serving source"
                    );
                }
                Registration::Duplicate { route, existing } => {
                    info!(
                        source = %source.display(),
                        existing = %existing.display(),
                        route = %route,
                        "Ignoring source with a digest that was already seen"
                    );
                }
            }
        }

        Ok(registry)
    }

    /// Register a source under the route derived from its digest.
    pub fn register(&mut self, descriptor: SourceDescriptor, url_prefix: &str) -> Registration {
        let route = route_for(url_prefix, &descriptor.digest);

        if let Some(&index) = self.by_route.get(&route) {
            return Registration::Duplicate {
                route,
                existing: self.entries[index].1.path.clone(),
            };
        }

        self.by_route.insert(route.clone(), self.entries.len());
        self.entries.push((route.clone(), descriptor));
        Registration::Bound { route }
    }

    /// Look up the source bound to `route`.
    pub fn get(&self, route: &str) -> Option<&SourceDescriptor> {
        self.by_route
            .get(route)
            .map(|&index| &self.entries[index].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Routes and sources in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceDescriptor)> {
        self.entries
            .iter()
            .map(|(route, descriptor)| (route.as_str(), descriptor))
    }
}
