//! Deep structural equality over JSON values.

use serde_json::Value;

/// Deep equality with strict array order.
pub fn equals(a: &Value, b: &Value) -> bool {
    deep_equals(a, b, true)
}

/// Deep equality where arrays compare as multisets (`[1, 2, 3] == [2, 3, 1]`).
pub fn equals_unordered(a: &Value, b: &Value) -> bool {
    deep_equals(a, b, false)
}

pub fn deep_equals(a: &Value, b: &Value, strict_array_order: bool) -> bool {
    match (a, b) {
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                return false;
            }

            if strict_array_order {
                return a
                    .iter()
                    .zip(b.iter())
                    .all(|(x, y)| deep_equals(x, y, strict_array_order));
            }

            let mut remaining: Vec<&Value> = b.iter().collect();
            for x in a {
                match remaining
                    .iter()
                    .position(|y| deep_equals(x, y, strict_array_order))
                {
                    Some(pos) => {
                        remaining.swap_remove(pos);
                    }
                    None => return false,
                }
            }
            true
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, x)| {
                    b.get(key)
                        .map(|y| deep_equals(x, y, strict_array_order))
                        .unwrap_or(false)
                })
        }
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}
