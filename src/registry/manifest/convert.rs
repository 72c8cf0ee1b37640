//! Schema 2 to schema 1 conversion.
//!
//! The v1 history is rebuilt from the image config: every history entry becomes one `fsLayers`
//! element, empty-layer entries pointing to the well-known empty tar blob. Entries are emitted
//! top layer first. The output depends only on the manifest and its config, so converting the
//! same image twice yields the same bytes.

use crate::registry::oci::{Digest, Manifest};
use crate::registry::Error;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

/// Digest of the gzipped empty tar archive used for layers without content.
pub const EMPTY_LAYER_BLOB_SUM: &str =
    "sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";

#[derive(Debug, Default, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    empty_layer: bool,
}

#[derive(Serialize)]
struct ContainerConfig<'a> {
    #[serde(rename = "Cmd")]
    cmd: Vec<&'a str>,
}

#[derive(Serialize)]
struct V1Compatibility<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    parent: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<&'a str>,
    container_config: ContainerConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    throwaway: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FsLayer {
    blob_sum: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct History {
    v1_compatibility: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SchemaOneManifest<'a> {
    schema_version: u32,
    name: &'a str,
    tag: &'a str,
    architecture: &'a str,
    fs_layers: Vec<FsLayer>,
    history: Vec<History>,
}

/// Builds the unsigned schema 1 document for an image manifest and its config blob.
///
/// `tag` is written as given; for digest references this is the digest text.
pub fn to_schema1(
    name: &str,
    tag: &str,
    manifest: &Manifest,
    config: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut config: Map<String, Value> = serde_json::from_slice(config)
        .map_err(|e| Error::ManifestInvalid(format!("image config is not an object: {e}")))?;

    let history = match config.remove("history") {
        Some(history) => serde_json::from_value::<Vec<HistoryEntry>>(history)
            .map_err(|e| Error::ManifestInvalid(format!("invalid image history: {e}")))?,
        None => Vec::new(),
    };
    config.remove("rootfs");

    // Images built without history get one anonymous entry per layer.
    let history = if history.is_empty() {
        manifest.layers.iter().map(|_| HistoryEntry::default()).collect()
    } else {
        history
    };

    let layer_entries = history.iter().filter(|h| !h.empty_layer).count();
    if layer_entries != manifest.layers.len() || history.is_empty() {
        return Err(Error::ManifestInvalid(format!(
            "image history describes {layer_entries} layers, manifest has {}",
            manifest.layers.len()
        )));
    }

    let architecture = config
        .get("architecture")
        .and_then(Value::as_str)
        .unwrap_or("amd64")
        .to_string();

    let mut layers = manifest.layers.iter();
    let mut parent = String::new();
    let mut fs_layers = Vec::with_capacity(history.len());
    let mut v1_history = Vec::with_capacity(history.len());

    for (index, entry) in history.iter().enumerate() {
        let blob_sum = if entry.empty_layer {
            EMPTY_LAYER_BLOB_SUM.to_string()
        } else {
            layers
                .next()
                .map(|layer| layer.digest.to_string())
                .ok_or_else(|| Error::ManifestInvalid("missing layer".to_string()))?
        };

        let blob_hash = blob_sum.split_once(':').map_or(blob_sum.as_str(), |(_, h)| h);
        let id = Digest::from_content(format!("{blob_hash} {parent}").as_bytes())
            .hash()
            .to_string();

        let v1_compatibility = if index == history.len() - 1 {
            let mut top = config.clone();
            top.insert("id".to_string(), Value::String(id.clone()));
            if !parent.is_empty() {
                top.insert("parent".to_string(), Value::String(parent.clone()));
            }
            if entry.empty_layer {
                top.insert("throwaway".to_string(), Value::Bool(true));
            }
            serde_json::to_string(&top)?
        } else {
            serde_json::to_string(&V1Compatibility {
                id: &id,
                parent: &parent,
                comment: entry.comment.as_deref(),
                created: entry.created.as_deref(),
                container_config: ContainerConfig {
                    cmd: entry.created_by.as_deref().into_iter().collect(),
                },
                author: entry.author.as_deref(),
                throwaway: entry.empty_layer,
            })?
        };

        fs_layers.push(FsLayer { blob_sum });
        v1_history.push(History { v1_compatibility });
        parent = id;
    }

    fs_layers.reverse();
    v1_history.reverse();

    let document = SchemaOneManifest {
        schema_version: 1,
        name,
        tag,
        architecture: &architecture,
        fs_layers,
        history: v1_history,
    };

    to_pretty_json(&document)
}

/// Serializes with the three-space indentation schema 1 documents use.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"   ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(buffer)
}
