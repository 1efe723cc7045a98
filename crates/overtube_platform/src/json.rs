#![forbid(unsafe_code)]

//! Deep lookups into loosely-typed JSON documents.
//!
//! The YouTube endpoints return large undocumented payloads; connectors walk them with
//! paths mixing object keys and array indices. Negative indices count from the end.

use std::fmt::{self, Write as _};

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// One step of a lookup path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSeg<'a> {
	Key(&'a str),
	Index(i64),
}

impl<'a> From<&'a str> for PathSeg<'a> {
	fn from(key: &'a str) -> Self {
		PathSeg::Key(key)
	}
}

impl From<i64> for PathSeg<'_> {
	fn from(index: i64) -> Self {
		PathSeg::Index(index)
	}
}

impl From<i32> for PathSeg<'_> {
	fn from(index: i32) -> Self {
		PathSeg::Index(i64::from(index))
	}
}

impl fmt::Display for PathSeg<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PathSeg::Key(k) => write!(f, ".{k}"),
			PathSeg::Index(i) => write!(f, "[{i}]"),
		}
	}
}

/// Build a `[PathSeg]` array from mixed keys and indices.
///
/// ```
/// use overtube_platform::json_path;
/// let path = json_path!["actions", 0, "item"];
/// assert_eq!(path.len(), 3);
/// ```
#[macro_export]
macro_rules! json_path {
	($($seg:expr),* $(,)?) => {
		[$($crate::json::PathSeg::from($seg)),*]
	};
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
	#[error("key {key:?} not found at `{at}`")]
	MissingKey { at: String, key: String },
	#[error("index {index} out of bounds (len {len}) at `{at}`")]
	OutOfBounds { at: String, index: i64, len: usize },
	#[error("expected {expected} at `{at}`")]
	WrongType { at: String, expected: &'static str },
}

fn render(path: &[PathSeg<'_>]) -> String {
	let mut out = String::from("$");
	for seg in path {
		let _ = write!(out, "{seg}");
	}
	out
}

fn step<'v>(value: &'v Value, seg: PathSeg<'_>, walked: &[PathSeg<'_>]) -> Result<&'v Value, LookupError> {
	match seg {
		PathSeg::Key(key) => {
			let obj = value.as_object().ok_or_else(|| LookupError::WrongType {
				at: render(walked),
				expected: "object",
			})?;
			obj.get(key).ok_or_else(|| LookupError::MissingKey {
				at: render(walked),
				key: key.to_string(),
			})
		}
		PathSeg::Index(index) => {
			let arr = value.as_array().ok_or_else(|| LookupError::WrongType {
				at: render(walked),
				expected: "array",
			})?;
			let len = arr.len();
			let resolved = if index < 0 {
				i64::try_from(len).ok().and_then(|l| usize::try_from(l + index).ok())
			} else {
				usize::try_from(index).ok()
			};
			resolved
				.and_then(|i| arr.get(i))
				.ok_or_else(|| LookupError::OutOfBounds {
					at: render(walked),
					index,
					len,
				})
		}
	}
}

fn walk<'v>(value: &'v Value, path: &[PathSeg<'_>], depth: usize) -> Result<&'v Value, LookupError> {
	if depth == path.len() {
		return Ok(value);
	}
	let next = step(value, path[depth], &path[..depth])?;
	walk(next, path, depth + 1)
}

/// Resolve `path` under `root`. Misses are logged unless `silent`.
pub fn lookup<'v>(root: &'v Value, path: &[PathSeg<'_>], silent: bool) -> Result<&'v Value, LookupError> {
	let res = walk(root, path, 0);
	if let Err(e) = &res
		&& !silent
	{
		warn!(path = %render(path), error = %e, "json lookup miss");
	}
	res
}

pub fn lookup_str<'v>(root: &'v Value, path: &[PathSeg<'_>], silent: bool) -> Result<&'v str, LookupError> {
	let v = lookup(root, path, silent)?;
	v.as_str().ok_or_else(|| LookupError::WrongType {
		at: render(path),
		expected: "string",
	})
}

pub fn lookup_array<'v>(root: &'v Value, path: &[PathSeg<'_>], silent: bool) -> Result<&'v [Value], LookupError> {
	let v = lookup(root, path, silent)?;
	v.as_array().map(Vec::as_slice).ok_or_else(|| LookupError::WrongType {
		at: render(path),
		expected: "array",
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn doc() -> Value {
		json!({
			"a": {
				"items": [
					{ "name": "first" },
					{ "name": "second" },
					{ "name": "last" }
				]
			}
		})
	}

	#[test]
	fn resolves_keys_and_indices() {
		let d = doc();
		let v = lookup_str(&d, &json_path!["a", "items", 1, "name"], true).unwrap();
		assert_eq!(v, "second");
	}

	#[test]
	fn negative_index_counts_from_end() {
		let d = doc();
		assert_eq!(lookup_str(&d, &json_path!["a", "items", -1, "name"], true).unwrap(), "last");
		assert_eq!(lookup_str(&d, &json_path!["a", "items", -3, "name"], true).unwrap(), "first");
		assert!(matches!(
			lookup(&d, &json_path!["a", "items", -4], true),
			Err(LookupError::OutOfBounds { index: -4, len: 3, .. })
		));
	}

	#[test]
	fn reports_where_the_walk_stopped() {
		let d = doc();
		let err = lookup(&d, &json_path!["a", "missing", 0], true).unwrap_err();
		assert_eq!(
			err,
			LookupError::MissingKey {
				at: "$.a".to_string(),
				key: "missing".to_string()
			}
		);

		let err = lookup(&d, &json_path!["a", "items", "name"], true).unwrap_err();
		assert!(matches!(err, LookupError::WrongType { expected: "object", .. }));
	}

	#[test]
	fn typed_helpers_check_the_leaf() {
		let d = doc();
		assert_eq!(lookup_array(&d, &json_path!["a", "items"], true).unwrap().len(), 3);
		assert!(matches!(
			lookup_str(&d, &json_path!["a", "items"], true),
			Err(LookupError::WrongType { expected: "string", .. })
		));
	}

	#[test]
	fn empty_path_is_the_root() {
		let d = json!(5);
		assert_eq!(lookup(&d, &[], false).unwrap(), &json!(5));
	}
}
