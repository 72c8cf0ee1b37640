//! Local filesystem primitives shared by the blob and metadata stores.

pub mod fs;
