//! Argument key encoding
//!
//! Turns a method's positional arguments into the key suffix used after
//! `<base key>:`. The default encoding mirrors a query string:
//! `0=<arg0>&1=<arg1>...`, where objects and arrays are JSON text and
//! primitives are written as-is.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::error::Result;

/// Caller-supplied argument encoder.
pub type ArgsEncoder<A> = Arc<dyn Fn(&A) -> Result<String> + Send + Sync>;

/// Encodes `args` as positional query-string pairs.
///
/// `args` is treated as the positional argument list: a tuple (or array)
/// contributes one pair per element, `()` contributes nothing, and any other
/// value is a single argument at index 0.
pub fn encode_args<A: Serialize + ?Sized>(args: &A) -> Result<String> {
    let positional = match serde_json::to_value(args)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };

    let mut query = form_urlencoded::Serializer::new(String::new());
    for (index, arg) in positional.iter().enumerate() {
        query.append_pair(&index.to_string(), &stringify_arg(arg)?);
    }
    Ok(query.finish())
}

/// The default encoder as an `ArgsEncoder`.
pub fn default_encoder<A: Serialize + 'static>() -> ArgsEncoder<A> {
    Arc::new(|args: &A| encode_args(args))
}

fn stringify_arg(arg: &Value) -> Result<String> {
    Ok(match arg {
        Value::Object(_) | Value::Array(_) => serde_json::to_string(arg)?,
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => arg.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitives_and_objects() {
        let encoded = encode_args(&(1, json!({"a": 1}))).unwrap();
        assert_eq!(encoded, "0=1&1=%7B%22a%22%3A1%7D");
    }

    #[test]
    fn test_equal_args_encode_equally() {
        let a = encode_args(&(1, json!({"a": 1}))).unwrap();
        let b = encode_args(&(1, json!({"a": 1}))).unwrap();
        let c = encode_args(&(1, json!({"a": 2}))).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_no_args() {
        assert_eq!(encode_args(&()).unwrap(), "");
    }

    #[test]
    fn test_single_non_tuple_argument() {
        assert_eq!(encode_args(&"alice").unwrap(), "0=alice");
        assert_eq!(encode_args(&(42,)).unwrap(), "0=42");
    }

    #[test]
    fn test_strings_are_not_quoted() {
        assert_eq!(encode_args(&("a b", true)).unwrap(), "0=a+b&1=true");
    }

    #[test]
    fn test_nested_array_argument_is_json() {
        assert_eq!(
            encode_args(&(vec![1, 2],)).unwrap(),
            "0=%5B1%2C2%5D"
        );
    }

    #[test]
    fn test_null_argument_is_empty() {
        assert_eq!(encode_args(&(Option::<u8>::None, 3)).unwrap(), "0=&1=3");
    }

    #[test]
    fn test_prefix_of_longer_argument_list() {
        let one = encode_args(&(1,)).unwrap();
        let two = encode_args(&(1, "x")).unwrap();
        assert!(two.starts_with(&one));
    }
}
