//! Typed access into loosely-typed documents
//!
//! Dynamic Kubernetes objects (Machines, provider specs) arrive as
//! `serde_json::Value`. Walking them with `get(..).and_then(..)` chains loses
//! the reason a lookup failed. [`lookup`] walks a key path and reports exactly
//! which segment was absent or had the wrong type.

use serde_json::Value;

use crate::Error;

/// Outcome of looking up a key path in a JSON document
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup<T> {
    /// The path resolved to a value of the requested type
    Found(T),
    /// A key along the path is absent (or the value is `null`)
    MissingKey {
        /// Dotted path up to and including the missing key
        path: String,
    },
    /// A value along the path has an unexpected JSON type
    WrongType {
        /// Dotted path of the offending value
        path: String,
        /// Type that was required there
        expected: &'static str,
        /// Type that was found
        found: &'static str,
    },
}

impl<T> Lookup<T> {
    /// Convert into a `Result`, reporting failures as malformed input on `entity`
    pub fn require(self, entity: &str) -> Result<T, Error> {
        match self {
            Lookup::Found(v) => Ok(v),
            Lookup::MissingKey { path } => Err(Error::malformed_field(
                entity,
                path.clone(),
                format!("required field {} is missing", path),
            )),
            Lookup::WrongType {
                path,
                expected,
                found,
            } => Err(Error::malformed_field(
                entity,
                path.clone(),
                format!("field {} should be {} but is {}", path, expected, found),
            )),
        }
    }
}

/// Name of a JSON value's type, for diagnostics
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk `path` through nested objects of `doc`
///
/// Every segment but the last must resolve to an object. An empty path
/// returns the document itself.
pub fn lookup<'a>(doc: &'a Value, path: &[&str]) -> Lookup<&'a Value> {
    let mut current = doc;
    let mut walked: Vec<&str> = Vec::with_capacity(path.len());

    for key in path {
        let map = match current {
            Value::Object(map) => map,
            other => {
                return Lookup::WrongType {
                    path: display_path(&walked),
                    expected: "object",
                    found: type_name(other),
                }
            }
        };
        walked.push(key);
        current = match map.get(*key) {
            Some(Value::Null) | None => {
                return Lookup::MissingKey {
                    path: display_path(&walked),
                }
            }
            Some(v) => v,
        };
    }

    Lookup::Found(current)
}

/// Walk `path` and require the final value to be a string
pub fn lookup_str<'a>(doc: &'a Value, path: &[&str]) -> Lookup<&'a str> {
    match lookup(doc, path) {
        Lookup::Found(Value::String(s)) => Lookup::Found(s.as_str()),
        Lookup::Found(other) => Lookup::WrongType {
            path: display_path(path),
            expected: "string",
            found: type_name(other),
        },
        Lookup::MissingKey { path } => Lookup::MissingKey { path },
        Lookup::WrongType {
            path,
            expected,
            found,
        } => Lookup::WrongType {
            path,
            expected,
            found,
        },
    }
}

fn display_path(path: &[&str]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}
