//! Applies an ordered list of [`HeaderOp`] to a header map.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::models::upstream::{HeaderOp, HeaderOpKind};

#[derive(Debug, thiserror::Error)]
pub enum HeaderOpError {
    #[error("header operation #{index} names an invalid header key '{key}'")]
    InvalidKey { index: usize, key: String },
    #[error("header operation #{index} on '{key}' has an invalid value")]
    InvalidValue { index: usize, key: String },
}

/// Applies `ops` in order. On the first invalid operation, returns which
/// index failed and leaves the headers mutated by every earlier op (the
/// batch is not rolled back — the caller should treat this as fatal).
pub fn apply_all(headers: &mut HeaderMap, ops: &[HeaderOp]) -> Result<(), HeaderOpError> {
    for (index, op) in ops.iter().enumerate() {
        if header_name(&op.key).is_err() {
            return Err(HeaderOpError::InvalidKey {
                index,
                key: op.key.clone(),
            });
        }
        apply_one(headers, op).map_err(|_| HeaderOpError::InvalidValue {
            index,
            key: op.key.clone(),
        })?;
    }
    Ok(())
}

fn header_name(key: &str) -> Result<HeaderName, ()> {
    HeaderName::from_bytes(key.as_bytes()).map_err(|_| ())
}

fn apply_one(headers: &mut HeaderMap, op: &HeaderOp) -> Result<(), ()> {
    let name = header_name(&op.key)?;
    match op.op {
        HeaderOpKind::Insert => {
            if !headers.contains_key(&name) {
                let value = HeaderValue::from_str(op.value.as_deref().unwrap_or("")).map_err(|_| ())?;
                headers.insert(name, value);
            }
        }
        HeaderOpKind::Replace => {
            let value = HeaderValue::from_str(op.value.as_deref().unwrap_or("")).map_err(|_| ())?;
            headers.insert(name, value);
        }
        HeaderOpKind::Remove => {
            headers.remove(&name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: HeaderOpKind, key: &str, value: Option<&str>) -> HeaderOp {
        HeaderOp {
            op: kind,
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn insert_does_not_override_existing() {
        let mut headers = HeaderMap::new();
        apply_all(
            &mut headers,
            &[
                op(HeaderOpKind::Insert, "x-k", Some("v1")),
                op(HeaderOpKind::Insert, "x-k", Some("v2")),
            ],
        )
        .unwrap();
        assert_eq!(headers.get("x-k").unwrap(), "v1");
    }

    #[test]
    fn replace_overrides_existing() {
        let mut headers = HeaderMap::new();
        apply_all(
            &mut headers,
            &[
                op(HeaderOpKind::Insert, "x-k", Some("v1")),
                op(HeaderOpKind::Replace, "x-k", Some("v2")),
            ],
        )
        .unwrap();
        assert_eq!(headers.get("x-k").unwrap(), "v2");
    }

    #[test]
    fn remove_deletes_key() {
        let mut headers = HeaderMap::new();
        apply_all(
            &mut headers,
            &[
                op(HeaderOpKind::Insert, "x-k", Some("v1")),
                op(HeaderOpKind::Remove, "x-k", None),
            ],
        )
        .unwrap();
        assert!(headers.get("x-k").is_none());
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut headers = HeaderMap::new();
        apply_all(&mut headers, &[op(HeaderOpKind::Insert, "X-K", Some("v1"))]).unwrap();
        assert_eq!(headers.get("x-k").unwrap(), "v1");
    }
}
