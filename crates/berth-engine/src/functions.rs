//! Template helper functions and filters
//!
//! The helper set is fixed and deterministic: no filesystem or network
//! access is possible from within template evaluation. `env_or` and `now`
//! close over per-invocation state and are registered by the renderer.

use minijinja::Value;

/// Fall back when a value is undefined, none or an empty string
///
/// Usage: {{ vars.REGION | default("eu") }}
pub fn default(value: Value, fallback: Value) -> Value {
    if value.is_undefined() || value.is_none() {
        return fallback;
    }
    if let Some(s) = value.as_str() {
        if s.is_empty() {
            return fallback;
        }
    }
    value
}

/// Lowercase a string
///
/// Usage: {{ name | to_lower }}
pub fn to_lower(value: String) -> String {
    value.to_lowercase()
}

/// Turn a string into a DNS-friendly slug
///
/// Lowercases and maps spaces and underscores to dashes.
///
/// Usage: {{ vars.BRANCH | slug }}
pub fn slug(value: String) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .collect()
}

/// Truncate a commit SHA to 12 characters
///
/// Usage: {{ vars.GIT_SHA | trunc_sha }}
pub fn trunc_sha(value: String) -> String {
    let cut = value
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..cut].to_string()
}

/// Ternary operator
///
/// Usage: {{ ternary(slot > 0, "slotted", "shared") }}
pub fn ternary(condition: Value, true_val: Value, false_val: Value) -> Value {
    if condition.is_true() {
        true_val
    } else {
        false_val
    }
}

/// Interpret a rendered `when` expression
///
/// An item is excluded when the trimmed result is empty or equals
/// (case-insensitively) `false`, `0` or `no`; anything else includes it.
pub fn truthy_when(rendered: &str) -> bool {
    let trimmed = rendered.trim();
    !(trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("false")
        || trimmed == "0"
        || trimmed.eq_ignore_ascii_case("no"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        assert_eq!(
            default(Value::UNDEFINED, Value::from("x")).as_str(),
            Some("x")
        );
        assert_eq!(
            default(Value::from(""), Value::from("x")).as_str(),
            Some("x")
        );
        assert_eq!(
            default(Value::from("set"), Value::from("x")).as_str(),
            Some("set")
        );
        assert_eq!(default(Value::from(0), Value::from(9)).as_i64(), Some(0));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Fix Login_Bug".to_string()), "fix-login-bug");
        assert_eq!(slug("already-ok".to_string()), "already-ok");
    }

    #[test]
    fn test_trunc_sha() {
        assert_eq!(
            trunc_sha("0123456789abcdef0123".to_string()),
            "0123456789ab"
        );
        assert_eq!(trunc_sha("short".to_string()), "short");
    }

    #[test]
    fn test_ternary() {
        assert_eq!(
            ternary(Value::from(true), Value::from("a"), Value::from("b")).as_str(),
            Some("a")
        );
        assert_eq!(
            ternary(Value::from(false), Value::from("a"), Value::from("b")).as_str(),
            Some("b")
        );
    }

    #[test]
    fn test_truthy_when() {
        assert!(truthy_when("yes"));
        assert!(truthy_when("true-ish"));
        assert!(truthy_when("1"));
        assert!(!truthy_when(""));
        assert!(!truthy_when("  "));
        assert!(!truthy_when("false"));
        assert!(!truthy_when("FALSE"));
        assert!(!truthy_when("0"));
        assert!(!truthy_when("No"));
    }
}
