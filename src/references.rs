//! Reference expansion for `$[path]` placeholders.
//!
//! Before a task is dispatched its fields are scanned for `$[dotted.path]`
//! references and resolved against the whole instance root, so
//! `environment.FOO`, `tasks.a.parameters.x` and
//! `tasks.a.tasks.b.parameters.y[0]` are all addressable. A reference that
//! stands alone as an entire field value is replaced structurally, keeping the
//! resolved value's native type; a reference embedded in a larger string is
//! stringified and spliced in. An unresolved path substitutes null and logs a
//! warning; it never fails the task.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use crate::workflow::Task;

lazy_static! {
    static ref REFERENCE: Regex =
        Regex::new(r"\$\[((?:[^\[\]]+|\[\d+\])*)\]").expect("reference pattern is valid");
}

/// Expand every reference in a value tree against `root`.
#[must_use]
pub fn expand_value(value: &Value, root: &Value) -> Value {
    match value {
        Value::String(s) => expand_string(s, root),
        Value::Object(map) => {
            let mut expanded = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                expanded.insert(key.clone(), expand_value(item, root));
            }
            Value::Object(expanded)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, root)).collect()),
        other => other.clone(),
    }
}

/// Expand the reference-bearing fields of a task in place: `parameters` and
/// the `skipIf`/`errorIf` gates.
pub fn expand_task(task: &mut Task, root: &Value) {
    task.parameters = expand_value(&task.parameters, root);
    if let Some(skip_if) = &task.skip_if {
        task.skip_if = Some(expand_value(skip_if, root));
    }
    if let Some(error_if) = &task.error_if {
        task.error_if = Some(expand_value(error_if, root));
    }
}

/// Expand a single string field. Returns the resolved value itself when the
/// string is exactly one reference, otherwise a string with every reference
/// spliced in as text.
#[must_use]
pub fn expand_string(s: &str, root: &Value) -> Value {
    if !s.contains("$[") {
        return Value::String(s.to_string());
    }

    if let Some(caps) = REFERENCE.captures(s) {
        let standalone = caps
            .get(0)
            .is_some_and(|whole| whole.start() == 0 && whole.end() == s.len());
        if standalone {
            let path = caps.get(1).map_or("", |m| m.as_str());
            return match resolve_path(root, path) {
                Some(value) => value.clone(),
                None => {
                    warn!("Unresolved reference $[{path}], substituting null");
                    Value::Null
                }
            };
        }
    }

    let expanded = REFERENCE.replace_all(s, |caps: &Captures| {
        let path = caps.get(1).map_or("", |m| m.as_str());
        match resolve_path(root, path) {
            Some(value) => value_to_text(value),
            None => {
                warn!("Unresolved reference $[{path}], substituting null");
                "null".to_string()
            }
        }
    });
    Value::String(expanded.into_owned())
}

/// Resolve a dotted path with optional `[integer]` subscripts against a value
/// tree.
#[must_use]
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (key, indices) = parse_segment(segment)?;
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indices {
            current = current.get(index)?;
        }
    }
    Some(current)
}

fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let (key, mut rest) = match segment.find('[') {
        Some(pos) => segment.split_at(pos),
        None => (segment, ""),
    };
    let mut indices = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        let (number, tail) = inner.split_at(close);
        indices.push(number.parse::<usize>().ok()?);
        rest = tail.strip_prefix(']')?;
    }
    Some((key, indices))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root() -> Value {
        json!({
            "environment": {"HOME": "/tmp", "COUNT": "3"},
            "tasks": {
                "a": {
                    "parameters": {
                        "num": 42,
                        "flag": true,
                        "list": ["x", "y", "z"],
                        "obj": {"inner": 1},
                        "none": null,
                        "text": "line1\\line2 \"quoted\"\n",
                    },
                    "tasks": {
                        "b": {"parameters": {"y": [10, 20]}}
                    }
                }
            }
        })
    }

    #[test]
    fn standalone_reference_preserves_native_type() {
        let root = root();
        assert_eq!(
            expand_string("$[tasks.a.parameters.num]", &root),
            json!(42)
        );
        assert_eq!(
            expand_string("$[tasks.a.parameters.flag]", &root),
            json!(true)
        );
        assert_eq!(
            expand_string("$[tasks.a.parameters.list]", &root),
            json!(["x", "y", "z"])
        );
        assert_eq!(
            expand_string("$[tasks.a.parameters.obj]", &root),
            json!({"inner": 1})
        );
        assert_eq!(
            expand_string("$[tasks.a.parameters.none]", &root),
            Value::Null
        );
    }

    #[test]
    fn embedded_reference_is_stringified() {
        let root = root();
        assert_eq!(
            expand_string("val=$[environment.HOME]", &root),
            json!("val=/tmp")
        );
        assert_eq!(
            expand_string("n is $[tasks.a.parameters.num]!", &root),
            json!("n is 42!")
        );
        assert_eq!(
            expand_string("list: $[tasks.a.parameters.list]", &root),
            json!("list: [\"x\",\"y\",\"z\"]")
        );
    }

    #[test]
    fn array_subscripts_resolve_nested_elements() {
        let root = root();
        assert_eq!(
            expand_string("$[tasks.a.parameters.list[1]]", &root),
            json!("y")
        );
        assert_eq!(
            expand_string("$[tasks.a.tasks.b.parameters.y[0]]", &root),
            json!(10)
        );
    }

    #[test]
    fn unresolved_reference_substitutes_null() {
        let root = root();
        assert_eq!(expand_string("$[tasks.missing.parameters.x]", &root), Value::Null);
        assert_eq!(
            expand_string("got $[tasks.missing.x] here", &root),
            json!("got null here")
        );
        assert_eq!(
            expand_string("$[tasks.a.parameters.list[9]]", &root),
            Value::Null
        );
    }

    #[test]
    fn multiple_embedded_references_expand_in_one_pass() {
        let root = root();
        assert_eq!(
            expand_string("$[environment.HOME]/$[environment.COUNT]", &root),
            json!("/tmp/3")
        );
    }

    #[test]
    fn escaped_characters_survive_expansion() {
        let root = root();
        assert_eq!(
            expand_string("$[tasks.a.parameters.text]", &root),
            json!("line1\\line2 \"quoted\"\n")
        );
        assert_eq!(
            expand_string("pre $[tasks.a.parameters.text] post", &root),
            json!("pre line1\\line2 \"quoted\"\n post")
        );
    }

    #[test]
    fn expand_value_walks_nested_objects_and_arrays() {
        let root = root();
        let input = json!({
            "a": "$[tasks.a.parameters.num]",
            "b": ["$[environment.HOME]", {"c": "home=$[environment.HOME]"}],
            "d": 7,
        });
        assert_eq!(
            expand_value(&input, &root),
            json!({
                "a": 42,
                "b": ["/tmp", {"c": "home=/tmp"}],
                "d": 7,
            })
        );
    }

    #[test]
    fn plain_strings_pass_through_unchanged() {
        let root = root();
        assert_eq!(expand_string("no references here", &root), json!("no references here"));
        assert_eq!(expand_string("price in $USD", &root), json!("price in $USD"));
    }
}
