use crate::registry::oci::{Digest, Reference};
use crate::registry::server::route::Route;
use hyper::{Method, Uri};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;

fn parse_query<T: DeserializeOwned + Default>(params: &str) -> T {
    serde_urlencoded::from_str(params).unwrap_or_default()
}

#[derive(Deserialize, Default)]
struct PaginationQuery {
    n: Option<u16>,
    last: Option<String>,
}

pub fn parse<'a>(method: &Method, uri: &'a Uri, token_path: Option<&str>) -> Route<'a> {
    let path = uri.path();
    let params = uri.query();
    let read = method == Method::GET || method == Method::HEAD;

    if token_path.is_some_and(|token_path| token_path == path) && method == Method::GET {
        return Route::Token { query: params };
    }

    match path {
        "/healthz" if method == Method::GET => return Route::Healthz,
        "/metrics" if method == Method::GET => return Route::Metrics,
        "/v2" | "/v2/" if read => return Route::ApiVersion,
        _ => {}
    }

    let Some(path) = path.strip_prefix("/v2/") else {
        return Route::Unknown;
    };

    if !read {
        return Route::Unknown;
    }

    if let Some(route) = try_find_blobs(method, path) {
        return route;
    }

    if let Some(route) = try_find_manifests(method, path) {
        return route;
    }

    if let Some(route) = try_find_tags(method, path, params) {
        return route;
    }

    Route::Unknown
}

fn try_find_blobs<'a>(method: &Method, path: &'a str) -> Option<Route<'a>> {
    let blob_position = path.rfind("/blobs/")?;
    let namespace = &path[..blob_position];

    let digest = &path[blob_position + "/blobs/".len()..];
    let digest = match Digest::from_str(digest) {
        Ok(digest) => digest,
        Err(error) => return Some(Route::Malformed { namespace, error }),
    };

    if *method == Method::HEAD {
        Some(Route::HeadBlob { namespace, digest })
    } else {
        Some(Route::GetBlob { namespace, digest })
    }
}

fn try_find_manifests<'a>(method: &Method, path: &'a str) -> Option<Route<'a>> {
    let manifest_position = path.rfind("/manifests/")?;
    let namespace = &path[..manifest_position];

    let reference = &path[manifest_position + "/manifests/".len()..];
    let reference = match Reference::from_str(reference) {
        Ok(reference) => reference,
        Err(error) => return Some(Route::Malformed { namespace, error }),
    };

    if *method == Method::HEAD {
        Some(Route::HeadManifest {
            namespace,
            reference,
        })
    } else {
        Some(Route::GetManifest {
            namespace,
            reference,
        })
    }
}

fn try_find_tags<'a>(method: &Method, path: &'a str, params: Option<&'a str>) -> Option<Route<'a>> {
    let namespace = path.strip_suffix("/tags/list")?;
    if *method != Method::GET {
        return None;
    }

    let (n, last) = if let Some(p) = params.map(parse_query::<PaginationQuery>) {
        (p.n, p.last)
    } else {
        (None, None)
    };

    Some(Route::ListTags { namespace, n, last })
}
