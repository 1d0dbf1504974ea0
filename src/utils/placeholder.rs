//! Placeholder substitution for mock bodies
//!
//! Tokens of the form `@<channel>.body.<dotted.path>` inside a mock
//! response are replaced with values looked up in the corresponding
//! input document (the request body for the `request` channel). A string
//! that consists of exactly one token keeps the looked-up value's native
//! JSON type; mixed-content strings are coerced to strings, with complex
//! replacements JSON-serialized in place.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*").expect("literal pattern"));

/// Substitution engine bound to one channel prefix.
pub struct PlaceholderResolver {
    prefix: String,
    token: Regex,
}

impl PlaceholderResolver {
    /// `channel` is e.g. `request` (HTTP mocks) or `stdin` (stdio mocks).
    pub fn new(channel: &str) -> Self {
        let prefix = format!("@{channel}.body.");
        let token = Regex::new(&format!(
            "{}{}",
            regex::escape(&prefix),
            PATH_CHARS.as_str()
        ))
        .expect("token pattern built from literals");
        Self { prefix, token }
    }

    /// Recursive structural walk: only strings containing the prefix
    /// trigger lookup; objects and arrays recurse; other scalars pass
    /// through untouched.
    pub fn resolve(&self, value: &JsonValue, source: Option<&JsonValue>) -> JsonValue {
        match value {
            JsonValue::String(s) => self.resolve_str(s, source),
            JsonValue::Array(items) => JsonValue::Array(
                items.iter().map(|v| self.resolve(v, source)).collect(),
            ),
            JsonValue::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v, source)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_str(&self, s: &str, source: Option<&JsonValue>) -> JsonValue {
        if !s.contains(&self.prefix) {
            return JsonValue::String(s.to_string());
        }

        // A single-token string keeps the native type of the replacement.
        if let Some(m) = self.token.find(s) {
            if m.start() == 0 && m.end() == s.len() {
                return match self.lookup(m.as_str(), source) {
                    Some(v) => v.clone(),
                    None => JsonValue::String(s.to_string()),
                };
            }
        }

        let replaced = self.token.replace_all(s, |caps: &regex::Captures<'_>| {
            let token = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            match self.lookup(token, source) {
                Some(JsonValue::String(v)) => v.clone(),
                Some(other) => other.to_string(),
                None => {
                    log::debug!("placeholder path not found: {token}");
                    token.to_string()
                }
            }
        });
        JsonValue::String(replaced.into_owned())
    }

    fn lookup<'a>(&self, token: &str, source: Option<&'a JsonValue>) -> Option<&'a JsonValue> {
        let path = token.strip_prefix(&self.prefix)?;
        let mut current = source?;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> PlaceholderResolver {
        PlaceholderResolver::new("request")
    }

    #[test]
    fn test_single_token_keeps_native_type() {
        let source = json!({"user": {"id": 42}});
        let out = resolver().resolve(&json!("@request.body.user.id"), Some(&source));
        assert_eq!(out, json!(42));
    }

    #[test]
    fn test_single_token_object_replacement() {
        let source = json!({"user": {"id": 42, "name": "A"}});
        let out = resolver().resolve(&json!("@request.body.user"), Some(&source));
        assert_eq!(out, json!({"id": 42, "name": "A"}));
    }

    #[test]
    fn test_mixed_content_coerces_to_string() {
        let source = json!({"user": {"id": 42}});
        let out = resolver().resolve(
            &json!({"msg": "hello @request.body.user.id"}),
            Some(&source),
        );
        assert_eq!(out, json!({"msg": "hello 42"}));
    }

    #[test]
    fn test_mixed_content_serializes_complex_values() {
        let source = json!({"user": {"id": 42}});
        let out = resolver().resolve(&json!("got: @request.body.user"), Some(&source));
        assert_eq!(out, json!(r#"got: {"id":42}"#));
    }

    #[test]
    fn test_missing_path_keeps_token() {
        let source = json!({"user": {}});
        let out = resolver().resolve(&json!("hi @request.body.user.id!"), Some(&source));
        assert_eq!(out, json!("hi @request.body.user.id!"));
    }

    #[test]
    fn test_no_token_is_idempotent() {
        let source = json!({"a": 1});
        let value = json!({"msg": "plain text", "n": 7, "flag": true, "nested": {"x": [1, 2]}});
        let once = resolver().resolve(&value, Some(&source));
        assert_eq!(once, value);
        let twice = resolver().resolve(&once, Some(&source));
        assert_eq!(twice, value);
    }

    #[test]
    fn test_recurses_into_arrays() {
        let source = json!({"id": 9});
        let out = resolver().resolve(
            &json!(["@request.body.id", "and @request.body.id"]),
            Some(&source),
        );
        assert_eq!(out, json!([9, "and 9"]));
    }

    #[test]
    fn test_other_channel_prefix() {
        let resolver = PlaceholderResolver::new("stdin");
        let source = json!({"cmd": "run"});
        let out = resolver.resolve(&json!("@stdin.body.cmd"), Some(&source));
        assert_eq!(out, json!("run"));
    }

    #[test]
    fn test_no_source_keeps_token() {
        let out = resolver().resolve(&json!("@request.body.user.id"), None);
        assert_eq!(out, json!("@request.body.user.id"));
    }
}
