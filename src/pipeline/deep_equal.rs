use serde_json::Value;

/// Structural equality used by weak-consistency verification
/// (specification §4.E): object keys compare order-insensitively, array
/// elements compare order-sensitively, numbers compare exactly.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| deep_equal(v, bv)))
        }
        (Value::Array(a), Value::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equal(x, y)),
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_ignore_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn arrays_respect_order() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert!(!deep_equal(&a, &b));
    }

    #[test]
    fn numbers_compare_exactly() {
        assert!(!deep_equal(&json!(1), &json!(1.0)));
        assert!(deep_equal(&json!(1), &json!(1)));
    }

    #[test]
    fn nested_structures_recurse() {
        let a = json!({"items": [{"x": 1}, {"y": 2}], "tag": "t"});
        let b = json!({"tag": "t", "items": [{"x": 1}, {"y": 2}]});
        assert!(deep_equal(&a, &b));
    }
}
