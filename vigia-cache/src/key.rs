//! Cache key derivation.
//!
//! A derived key is the instance base key joined with a stable structural
//! rendering of the dependency values and the call arguments, separated by
//! `_`. Scalars are embedded bare so that business patterns like
//! `compliance_20-12345678-6` land verbatim inside derived keys; compound
//! values fall back to canonical JSON. Argument order is significant: two
//! calls with reordered arguments produce different keys.

use serde::Serialize;
use serde_json::Value;
use vigia_core::{TierError, VigiaError, VigiaResult};

/// Separator between the base key and each derived segment.
const SEPARATOR: char = '_';

/// Render one argument value as a key segment.
///
/// Strings, numbers and booleans are embedded bare; null renders to the
/// literal `null`; arrays and objects use their canonical JSON text. Bare
/// embedding is not injective: `"1"` and `1` collide, and a string
/// containing the separator collides with the split tuple (`("a_b",)` and
/// `("a", "b")` derive the same key). The arguments the engine sees are
/// CUITs, periods and page numbers, none of which contain `_`, and bare
/// embedding is what keeps substring invalidation patterns aligned with
/// derived keys.
fn segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        compound => compound.to_string(),
    }
}

/// Serialize a value through serde_json, mapping failures to a tier error.
fn to_value<A: Serialize>(args: &A) -> VigiaResult<Value> {
    serde_json::to_value(args).map_err(|e| {
        VigiaError::Tier(TierError::Serialization {
            reason: e.to_string(),
        })
    })
}

/// The prefix every key of an instance shares: base key plus dependency
/// segments. `clear` removes exactly the keys under this prefix.
pub fn instance_prefix(base_key: &str, depends_on: &[Value]) -> String {
    let mut prefix = String::from(base_key);
    for dep in depends_on {
        prefix.push(SEPARATOR);
        prefix.push_str(&segment(dep));
    }
    prefix
}

/// Derive the cache key for a call.
///
/// A unit argument (`()`) contributes nothing; a tuple or `Vec` contributes
/// one segment per element in order; any other value contributes a single
/// segment.
pub fn derive_key<A: Serialize>(
    base_key: &str,
    depends_on: &[Value],
    args: &A,
) -> VigiaResult<String> {
    let mut key = instance_prefix(base_key, depends_on);
    match to_value(args)? {
        Value::Null => {}
        Value::Array(elements) => {
            for element in &elements {
                key.push(SEPARATOR);
                key.push_str(&segment(element));
            }
        }
        single => {
            key.push(SEPARATOR);
            key.push_str(&segment(&single));
        }
    }
    Ok(key)
}
