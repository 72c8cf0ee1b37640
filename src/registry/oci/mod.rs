mod digest;
mod manifest;
pub mod media_type;
mod reference;

pub use digest::{Digest, DigestHasher};
pub use manifest::{Descriptor, Manifest, Platform};
pub use media_type::MediaType;
pub use reference::Reference;
