use std::fmt;
use std::fmt::{Display, Formatter};

pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_MANIFEST_V1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Manifest media types the registry knows how to serve.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MediaType {
    ManifestV1,
    ManifestV1Signed,
    ManifestV2,
    ManifestList,
    OciManifest,
    OciIndex,
}

impl MediaType {
    pub const ALL: [MediaType; 6] = [
        MediaType::ManifestV1,
        MediaType::ManifestV1Signed,
        MediaType::ManifestV2,
        MediaType::ManifestList,
        MediaType::OciManifest,
        MediaType::OciIndex,
    ];

    /// Parses a media type, ignoring parameters such as `; q=0.5`.
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        match essence {
            DOCKER_MANIFEST_V1 => Some(MediaType::ManifestV1),
            DOCKER_MANIFEST_V1_SIGNED => Some(MediaType::ManifestV1Signed),
            DOCKER_MANIFEST_V2 => Some(MediaType::ManifestV2),
            DOCKER_MANIFEST_LIST => Some(MediaType::ManifestList),
            OCI_IMAGE_MANIFEST => Some(MediaType::OciManifest),
            OCI_IMAGE_INDEX => Some(MediaType::OciIndex),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::ManifestV1 => DOCKER_MANIFEST_V1,
            MediaType::ManifestV1Signed => DOCKER_MANIFEST_V1_SIGNED,
            MediaType::ManifestV2 => DOCKER_MANIFEST_V2,
            MediaType::ManifestList => DOCKER_MANIFEST_LIST,
            MediaType::OciManifest => OCI_IMAGE_MANIFEST,
            MediaType::OciIndex => OCI_IMAGE_INDEX,
        }
    }

    pub fn is_index(self) -> bool {
        matches!(self, MediaType::ManifestList | MediaType::OciIndex)
    }

    pub fn is_image(self) -> bool {
        matches!(self, MediaType::ManifestV2 | MediaType::OciManifest)
    }

    pub fn is_schema1(self) -> bool {
        matches!(self, MediaType::ManifestV1 | MediaType::ManifestV1Signed)
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_parameters() {
        assert_eq!(
            MediaType::parse("application/vnd.docker.distribution.manifest.v2+json; q=0.9"),
            Some(MediaType::ManifestV2)
        );
        assert_eq!(MediaType::parse("application/json"), None);
    }

    #[test]
    fn test_round_trip_names() {
        for media_type in MediaType::ALL {
            assert_eq!(MediaType::parse(media_type.as_str()), Some(media_type));
        }
    }
}
