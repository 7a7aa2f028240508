//! Data-source registry: maps request ids to where their bytes live.
//!
//! Sources are tried in order; the first `pattern` that matches the id wins
//! and its named captures fill the `{name}` placeholders of `path`.
//! `{extension}` is replaced with the requested format's file extension.
//!
//! ```json
//! {
//!   "sources": [
//!     {
//!       "pattern": "^studyA/(?P<sample>[A-Za-z0-9_-]+)$",
//!       "path": "s3://genomes/studyA/{sample}.{extension}",
//!       "controlled": true
//!     }
//!   ]
//! }
//! ```

use crate::storage::ObjectLocation;
use crate::types::Format;
use crate::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Where a data source's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    Object(ObjectLocation),
    File(PathBuf),
}

impl DataLocation {
    pub fn parse(path: &str) -> Result<Self> {
        if path.contains("://") {
            Ok(DataLocation::Object(ObjectLocation::parse(path)?))
        } else {
            Ok(DataLocation::File(PathBuf::from(path)))
        }
    }
}

/// A resolved data source, owned by the request that resolved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub id: String,
    pub location: DataLocation,
    /// Tickets require a passport visa for the dataset.
    pub controlled: bool,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    sources: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    pattern: String,
    path: String,
    #[serde(default)]
    controlled: bool,
}

#[derive(Debug)]
struct Source {
    pattern: Regex,
    path: String,
    controlled: bool,
}

#[derive(Debug)]
pub struct DataSourceRegistry {
    sources: Vec<Source>,
}

impl DataSourceRegistry {
    /// Registry serving `<data_dir>/<id>.<extension>` without access control.
    pub fn local(data_dir: &Path) -> Self {
        let path = format!("{}/{{id}}.{{extension}}", data_dir.display());
        Self {
            sources: vec![Source {
                pattern: Regex::new(r"^(?P<id>[A-Za-z0-9._-]+)$").expect("static pattern"),
                path,
                controlled: false,
            }],
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid data source registry: {}", e)))?;

        let sources = file
            .sources
            .into_iter()
            .map(|entry| {
                let pattern = Regex::new(&entry.pattern).map_err(|e| {
                    Error::Configuration(format!("invalid pattern {}: {}", entry.pattern, e))
                })?;
                Ok(Source {
                    pattern,
                    path: entry.path,
                    controlled: entry.controlled,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { sources })
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("failed to read registry {:?}: {}", path, e))
        })?;
        Self::from_json(&json)
    }

    /// Resolve an id to its data source.
    pub fn resolve(&self, id: &str, format: Format) -> Result<DataSource> {
        for source in &self.sources {
            let Some(captures) = source.pattern.captures(id) else {
                continue;
            };

            let mut path = source.path.replace("{extension}", format.file_extension());
            for name in source.pattern.capture_names().flatten() {
                if let Some(value) = captures.name(name) {
                    path = path.replace(&format!("{{{}}}", name), value.as_str());
                }
            }

            tracing::debug!("id {} resolved to {}", id, path);
            return Ok(DataSource {
                id: id.to_string(),
                location: DataLocation::parse(&path)?,
                controlled: source.controlled,
            });
        }

        Err(Error::Configuration(format!(
            "could not determine data source path/url for id {}",
            id
        )))
    }
}
