use crate::registry::oci::{Digest, MediaType};
use crate::registry::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

/// The subset of a stored manifest needed to serve and convert it.
///
/// Covers Docker schema 2 manifests and lists, OCI manifests and indexes, and enough of a
/// schema 1 document (`fsLayers`, `signatures`) to recognize it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default)]
    pub fs_layers: Vec<FsLayer>,
    #[serde(default)]
    pub signatures: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: Digest,
}

impl Manifest {
    pub fn from_slice(s: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(s).map_err(|e| Error::ManifestInvalid(e.to_string()))
    }

    /// Determines the stored media type, falling back on the document shape when the
    /// `mediaType` field is absent (optional for OCI documents, absent in schema 1).
    pub fn media_type(&self) -> Result<MediaType, Error> {
        if let Some(media_type) = &self.media_type {
            return MediaType::parse(media_type)
                .ok_or_else(|| Error::ManifestInvalid(format!("unknown media type {media_type}")));
        }

        match self.schema_version {
            1 if self.signatures.is_empty() => Ok(MediaType::ManifestV1),
            1 => Ok(MediaType::ManifestV1Signed),
            2 if !self.manifests.is_empty() => Ok(MediaType::OciIndex),
            2 if self.config.is_some() => Ok(MediaType::OciManifest),
            version => Err(Error::ManifestInvalid(format!(
                "cannot determine media type of schema version {version}"
            ))),
        }
    }

    /// Every digest this manifest depends on: config and layers, child manifests, or schema 1
    /// blob sums.
    pub fn references(&self) -> Vec<&Digest> {
        let mut references: Vec<&Digest> = self.config.iter().map(|c| &c.digest).collect();
        references.extend(self.layers.iter().map(|l| &l.digest));
        references.extend(self.manifests.iter().map(|m| &m.digest));
        references.extend(self.fs_layers.iter().map(|l| &l.blob_sum));
        references
    }

    /// Picks the child of a manifest list for `os/architecture`, or the first child when none
    /// matches.
    pub fn select_child(&self, os: &str, architecture: &str) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|child| {
                child
                    .platform
                    .as_ref()
                    .is_some_and(|p| p.os == os && p.architecture == architecture)
            })
            .or_else(|| self.manifests.first())
    }
}
