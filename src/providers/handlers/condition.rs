use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::handler::{Handler, InvalidParametersSnafu, Result};
use crate::workflow::Task;

/// Evaluates `parameters.a <op> parameters.b` and writes the boolean into
/// `parameters.result`.
///
/// The operator set is closed: `eq`, `ne`, `gt`, `ge`, `lt`, `le`,
/// `contains`, `defined`. Anything else is rejected before evaluation.
pub struct ConditionHandler;

#[async_trait]
impl Handler for ConditionHandler {
    async fn handle(&self, _workflow_id: &str, _task_name: &str, task: &mut Task) -> Result<()> {
        let op = task
            .parameters
            .get("op")
            .and_then(Value::as_str)
            .unwrap_or("eq")
            .to_string();
        let a = task.parameters.get("a").cloned().unwrap_or(Value::Null);
        let b = task.parameters.get("b").cloned().unwrap_or(Value::Null);

        let result = match op.as_str() {
            "eq" => a == b,
            "ne" => a != b,
            "gt" => compare(&a, &b) == Some(Ordering::Greater),
            "ge" => matches!(compare(&a, &b), Some(Ordering::Greater | Ordering::Equal)),
            "lt" => compare(&a, &b) == Some(Ordering::Less),
            "le" => matches!(compare(&a, &b), Some(Ordering::Less | Ordering::Equal)),
            "contains" => contains(&a, &b),
            "defined" => !a.is_null(),
            other => {
                return InvalidParametersSnafu {
                    message: format!("unknown operator: {other}"),
                }
                .fail();
            }
        };

        task.parameters_object_mut()
            .insert("result".to_string(), Value::Bool(result));
        Ok(())
    }
}

/// Ordering over comparable values: numbers by value, strings
/// lexicographically. Mixed or non-comparable kinds yield no ordering.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(a: &Value, b: &Value) -> bool {
    match a {
        Value::String(haystack) => match b {
            Value::String(needle) => haystack.contains(needle),
            other => haystack.contains(&other.to_string()),
        },
        Value::Array(items) => items.contains(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn eval(params: Value) -> Result<Option<Value>> {
        let mut task = Task {
            parameters: params,
            ..Task::default()
        };
        ConditionHandler.handle("wf", "cond", &mut task).await?;
        Ok(task.parameters.get("result").cloned())
    }

    #[tokio::test]
    async fn numeric_and_string_comparisons() {
        assert_eq!(eval(json!({"a": 2, "op": "gt", "b": 1})).await.unwrap(), Some(json!(true)));
        assert_eq!(eval(json!({"a": 1, "op": "ge", "b": 1})).await.unwrap(), Some(json!(true)));
        assert_eq!(eval(json!({"a": 1, "op": "lt", "b": 1})).await.unwrap(), Some(json!(false)));
        assert_eq!(
            eval(json!({"a": "abc", "op": "le", "b": "abd"})).await.unwrap(),
            Some(json!(true))
        );
        assert_eq!(
            eval(json!({"a": "x", "op": "eq", "b": "x"})).await.unwrap(),
            Some(json!(true))
        );
        assert_eq!(
            eval(json!({"a": 1, "op": "ne", "b": "1"})).await.unwrap(),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn contains_and_defined() {
        assert_eq!(
            eval(json!({"a": "workflow", "op": "contains", "b": "flow"})).await.unwrap(),
            Some(json!(true))
        );
        assert_eq!(
            eval(json!({"a": [1, 2, 3], "op": "contains", "b": 2})).await.unwrap(),
            Some(json!(true))
        );
        assert_eq!(
            eval(json!({"a": null, "op": "defined"})).await.unwrap(),
            Some(json!(false))
        );
        assert_eq!(
            eval(json!({"a": 0, "op": "defined"})).await.unwrap(),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn mixed_kinds_do_not_order() {
        assert_eq!(
            eval(json!({"a": "2", "op": "gt", "b": 1})).await.unwrap(),
            Some(json!(false))
        );
    }

    #[tokio::test]
    async fn unknown_operator_is_rejected() {
        let err = eval(json!({"a": 1, "op": "xor", "b": 2})).await.unwrap_err();
        assert!(err.to_string().contains("unknown operator: xor"));
    }
}
