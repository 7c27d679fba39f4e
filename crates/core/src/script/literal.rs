//! Python source literals for bound template values.

use std::fmt::Write;

/// Double-quoted Python string literal with all special characters escaped.
pub fn py_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Python list of string literals.
pub fn py_str_list<S: AsRef<str>>(values: &[S]) -> String {
    let items: Vec<String> = values.iter().map(|v| py_str(v.as_ref())).collect();
    format!("[{}]", items.join(", "))
}

/// Python float literal. Callers validate finiteness beforehand; non-finite
/// values still produce valid source.
pub fn py_float(value: f64) -> String {
    if value.is_nan() {
        "float(\"nan\")".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "float(\"inf\")".to_string()
        } else {
            "float(\"-inf\")".to_string()
        }
    } else {
        format!("{value:?}")
    }
}

pub fn py_range(range: [f64; 2]) -> String {
    format!("[{}, {}]", py_float(range[0]), py_float(range[1]))
}

/// Scalar JSON values as Python literals; arrays and objects yield `None`
/// (they are not bindable as a single placeholder).
pub fn py_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => Some("None".to_string()),
        serde_json::Value::Bool(true) => Some("True".to_string()),
        serde_json::Value::Bool(false) => Some("False".to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(py_str(s)),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_escape_quotes_and_backslashes() {
        assert_eq!(py_str(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(py_str(r"\frac{1}{2}"), r#""\\frac{1}{2}""#);
        assert_eq!(py_str("a\nb"), r#""a\nb""#);
        assert_eq!(py_str("\u{7}"), r#""\u0007""#);
    }

    #[test]
    fn lists_and_ranges() {
        assert_eq!(py_str_list(&["a", "b"]), r#"["a", "b"]"#);
        assert_eq!(py_str_list::<&str>(&[]), "[]");
        assert_eq!(py_range([-5.0, 5.5]), "[-5.0, 5.5]");
        assert_eq!(py_float(f64::NAN), "float(\"nan\")");
    }

    #[test]
    fn scalars() {
        assert_eq!(py_scalar(&serde_json::json!(true)).as_deref(), Some("True"));
        assert_eq!(py_scalar(&serde_json::json!(3)).as_deref(), Some("3"));
        assert_eq!(py_scalar(&serde_json::json!("x")).as_deref(), Some("\"x\""));
        assert_eq!(py_scalar(&serde_json::json!([1])), None);
    }
}
