//! Control-plane request routing.
//!
//! Maps method + path pairs onto [`ApiOperation`]s. Object keys may
//! contain any UTF-8 (including `/`), so everything after
//! `/api/v1/objects/` is taken verbatim and percent-decoded.

use http::Method;
use percent_encoding::percent_decode_str;

/// The identified control-plane operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiOperation {
    /// `GET /health`
    Health,
    /// `GET /api/v1/buckets`
    ListBuckets,
    /// `GET /api/v1/buckets/{name}/stats`
    BucketStats {
        /// The bucket name from the path.
        name: String,
    },
    /// `POST /api/v1/buckets/{name}/reset`
    ResetBucket {
        /// The bucket name from the path.
        name: String,
    },
    /// `POST /api/v1/presign/upload`
    PresignUpload,
    /// `POST /api/v1/presign/download`
    PresignDownload,
    /// `POST /api/v1/presign/delete`
    PresignDelete,
    /// `POST /api/v1/presign/multipart`
    PresignMultipart,
    /// `GET /api/v1/objects`
    ListObjects,
    /// `GET /api/v1/objects/{key}`
    GetObject {
        /// The decoded object key.
        key: String,
    },
    /// `DELETE /api/v1/objects/{key}`
    DeleteObject {
        /// The decoded object key.
        key: String,
    },
}

/// Resolve a request to an operation; `None` is a 404.
#[must_use]
pub fn route(method: &Method, path: &str) -> Option<ApiOperation> {
    if method == Method::GET && path == "/health" {
        return Some(ApiOperation::Health);
    }

    let rest = path.strip_prefix("/api/v1/")?;

    if rest == "buckets" {
        return (method == Method::GET).then_some(ApiOperation::ListBuckets);
    }
    if let Some(bucket_path) = rest.strip_prefix("buckets/") {
        if let Some(name) = bucket_path.strip_suffix("/stats") {
            return (method == Method::GET && !name.is_empty()).then(|| {
                ApiOperation::BucketStats {
                    name: decode(name).unwrap_or_else(|| name.to_owned()),
                }
            });
        }
        if let Some(name) = bucket_path.strip_suffix("/reset") {
            return (method == Method::POST && !name.is_empty()).then(|| {
                ApiOperation::ResetBucket {
                    name: decode(name).unwrap_or_else(|| name.to_owned()),
                }
            });
        }
        return None;
    }

    if let Some(action) = rest.strip_prefix("presign/") {
        if method != Method::POST {
            return None;
        }
        return match action {
            "upload" => Some(ApiOperation::PresignUpload),
            "download" => Some(ApiOperation::PresignDownload),
            "delete" => Some(ApiOperation::PresignDelete),
            "multipart" => Some(ApiOperation::PresignMultipart),
            _ => None,
        };
    }

    if rest == "objects" {
        return (method == Method::GET).then_some(ApiOperation::ListObjects);
    }
    if let Some(raw_key) = rest.strip_prefix("objects/") {
        if raw_key.is_empty() {
            return None;
        }
        let key = decode(raw_key)?;
        return match *method {
            Method::GET => Some(ApiOperation::GetObject { key }),
            Method::DELETE => Some(ApiOperation::DeleteObject { key }),
            _ => None,
        };
    }

    None
}

/// Parse a query string into decoded key/value pairs.
#[must_use]
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((decode(name)?, decode(value)?))
        })
        .collect()
}

/// First value for a query parameter, if present.
#[must_use]
pub fn query_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(param, _)| param == name)
        .map(|(_, value)| value.as_str())
}

fn decode(raw: &str) -> Option<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|cow| cow.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_route_fixed_paths() {
        assert_eq!(route(&Method::GET, "/health"), Some(ApiOperation::Health));
        assert_eq!(
            route(&Method::GET, "/api/v1/buckets"),
            Some(ApiOperation::ListBuckets)
        );
        assert_eq!(
            route(&Method::POST, "/api/v1/presign/upload"),
            Some(ApiOperation::PresignUpload)
        );
        assert_eq!(
            route(&Method::GET, "/api/v1/objects"),
            Some(ApiOperation::ListObjects)
        );
    }

    #[test]
    fn test_should_route_bucket_subresources() {
        assert_eq!(
            route(&Method::GET, "/api/v1/buckets/alpha/stats"),
            Some(ApiOperation::BucketStats {
                name: "alpha".to_owned()
            })
        );
        assert_eq!(
            route(&Method::POST, "/api/v1/buckets/alpha/reset"),
            Some(ApiOperation::ResetBucket {
                name: "alpha".to_owned()
            })
        );
        assert_eq!(route(&Method::GET, "/api/v1/buckets/alpha"), None);
    }

    #[test]
    fn test_should_keep_slashes_in_object_keys() {
        assert_eq!(
            route(&Method::GET, "/api/v1/objects/photos/2024/cat.jpg"),
            Some(ApiOperation::GetObject {
                key: "photos/2024/cat.jpg".to_owned()
            })
        );
        assert_eq!(
            route(&Method::DELETE, "/api/v1/objects/a%20b%2Fc"),
            Some(ApiOperation::DeleteObject {
                key: "a b/c".to_owned()
            })
        );
    }

    #[test]
    fn test_should_reject_wrong_methods() {
        assert_eq!(route(&Method::POST, "/health"), None);
        assert_eq!(route(&Method::GET, "/api/v1/presign/upload"), None);
        assert_eq!(route(&Method::PUT, "/api/v1/objects/k"), None);
        assert_eq!(route(&Method::GET, "/api/v1/presign/rename"), None);
    }

    #[test]
    fn test_should_parse_query_params() {
        let params = parse_query("bucket=alpha&prefix=a%2Fb&limit=50&flag");
        assert_eq!(query_param(&params, "bucket"), Some("alpha"));
        assert_eq!(query_param(&params, "prefix"), Some("a/b"));
        assert_eq!(query_param(&params, "limit"), Some("50"));
        assert_eq!(query_param(&params, "flag"), Some(""));
        assert_eq!(query_param(&params, "missing"), None);
    }
}
