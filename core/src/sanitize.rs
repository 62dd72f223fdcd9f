//! Sanitization module for Faultline
//!
//! Normalizes arbitrary log context into a JSON structure and masks
//! sensitive information such as passwords, API keys, cookies and
//! bearer tokens before anything is persisted or sent.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::OnceLock;

/// Replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Nesting depth past which values are replaced instead of walked
const MAX_DEPTH: usize = 128;

/// Key fragments whose values are always redacted (case-insensitive
/// substring match on the key name)
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "pass",
    "pwd",
    "secret",
    "token",
    "access_token",
    "refresh_token",
    "api_key",
    "apikey",
    "api-key",
    "authorization",
    "cookie",
    "set-cookie",
    "session",
    "credit_card",
    "client_secret",
    "private_key",
    "ssh_key",
];

fn bearer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(Bearer\s+)[A-Za-z0-9\-._~+/]+=*").expect("valid bearer pattern")
    })
}

fn authorization_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(Authorization:\s*)(.+)").expect("valid authorization pattern")
    })
}

/// A host error object (code, message, payload and every recorded error)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    pub data: Value,
    pub all: Value,
}

impl StructuredError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        let mut all = Map::new();
        all.insert(code.clone(), Value::Array(vec![Value::String(message.clone())]));
        Self {
            code,
            message,
            data: Value::Null,
            all: Value::Object(all),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Context attached to a log call, before normalization
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Context {
    #[default]
    Empty,
    Value(Value),
    Error(StructuredError),
}

impl Context {
    /// Flatten any serializable object into a plain JSON structure.
    /// Serialization failures degrade to a descriptive string.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Context::Value(v),
            Err(e) => Context::Value(Value::String(format!("<unserializable: {e}>"))),
        }
    }
}

impl From<Value> for Context {
    fn from(value: Value) -> Self {
        Context::Value(value)
    }
}

impl From<Option<Value>> for Context {
    fn from(value: Option<Value>) -> Self {
        value.map(Context::Value).unwrap_or_default()
    }
}

impl From<StructuredError> for Context {
    fn from(error: StructuredError) -> Self {
        Context::Error(error)
    }
}

impl From<&str> for Context {
    fn from(value: &str) -> Self {
        Context::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Context {
    fn from(value: String) -> Self {
        Context::Value(Value::String(value))
    }
}

impl From<()> for Context {
    fn from(_: ()) -> Self {
        Context::Empty
    }
}

/// Redacts sensitive keys and scrubs credentials out of string leaves.
#[derive(Debug, Clone)]
pub struct ContextSanitizer {
    keys: Vec<String>,
}

impl Default for ContextSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_KEYS.iter().map(|s| s.to_string()).collect())
    }
}

impl ContextSanitizer {
    /// Create a sanitizer matching the given key fragments
    pub fn new(keys: Vec<String>) -> Self {
        let keys = keys.into_iter().map(|k| k.to_lowercase()).collect();
        Self { keys }
    }

    /// Normalize and sanitize a context. The result is always a JSON object
    /// or array (possibly empty).
    ///
    /// # Examples
    /// ```
    /// use faultline_core::sanitize::{Context, ContextSanitizer};
    /// use serde_json::json;
    ///
    /// let sanitizer = ContextSanitizer::default();
    /// let clean = sanitizer.sanitize(Context::from(json!({"password": "hunter2"})));
    /// assert_eq!(clean, json!({"password": "[REDACTED]"}));
    /// ```
    pub fn sanitize(&self, context: Context) -> Value {
        let mut value = normalize(context);
        self.scrub_children(&mut value, 0);
        value
    }

    /// Whether a key name matches one of the sensitive fragments
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let lower = key.to_lowercase();
        self.keys.iter().any(|fragment| lower.contains(fragment.as_str()))
    }

    /// Mask bearer tokens and `Authorization:` header values in a string
    pub fn scrub_string<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let bearer = bearer_pattern().replace_all(input, format!("${{1}}{REDACTED}"));
        if !authorization_pattern().is_match(&bearer) {
            return bearer;
        }
        let scrubbed = authorization_pattern()
            .replace_all(&bearer, format!("${{1}}{REDACTED}"))
            .into_owned();
        Cow::Owned(scrubbed)
    }

    /// Walk the children of a container. Keys are checked before values, and
    /// a matching key stops the descent.
    fn scrub_children(&self, value: &mut Value, depth: usize) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if self.is_sensitive_key(key) {
                        *child = Value::String(REDACTED.to_string());
                    } else {
                        self.scrub_leaf(child, depth + 1);
                    }
                }
            }
            Value::Array(items) => {
                for child in items.iter_mut() {
                    self.scrub_leaf(child, depth + 1);
                }
            }
            _ => {}
        }
    }

    fn scrub_leaf(&self, value: &mut Value, depth: usize) {
        if depth > MAX_DEPTH {
            *value = Value::String("[max depth exceeded]".to_string());
            return;
        }
        match value {
            Value::Object(_) | Value::Array(_) => self.scrub_children(value, depth),
            Value::String(s) => {
                if let Cow::Owned(scrubbed) = self.scrub_string(s) {
                    *s = scrubbed;
                }
            }
            _ => {}
        }
    }
}

/// Turn any context shape into an object or array
fn normalize(context: Context) -> Value {
    match context {
        Context::Empty | Context::Value(Value::Null) => Value::Object(Map::new()),
        Context::Error(error) => serde_json::json!({
            "code": error.code,
            "message": error.message,
            "data": error.data,
            "all": error.all,
        }),
        Context::Value(v @ (Value::Object(_) | Value::Array(_))) => v,
        Context::Value(Value::String(s)) => serde_json::json!({ "value": s }),
        Context::Value(scalar) => serde_json::json!({ "value": scalar.to_string() }),
    }
}

/// Whether a sanitized context carries anything worth storing
pub fn is_empty_context(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitize(value: Value) -> Value {
        ContextSanitizer::default().sanitize(Context::from(value))
    }

    #[test]
    fn test_password_key() {
        let out = sanitize(json!({"user": "bob", "password": "secret123"}));
        assert_eq!(out, json!({"user": "bob", "password": REDACTED}));
    }

    #[test]
    fn test_key_match_is_case_insensitive_substring() {
        let out = sanitize(json!({"X-Api-Key": "k", "DB_PASSWORD": "p", "userToken": "t"}));
        assert_eq!(out["X-Api-Key"], REDACTED);
        assert_eq!(out["DB_PASSWORD"], REDACTED);
        assert_eq!(out["userToken"], REDACTED);
    }

    #[test]
    fn test_nested_keys_redacted() {
        let out = sanitize(json!({
            "request": {"headers": {"Cookie": "sid=abc", "accept": "json"}},
            "items": [{"client_secret": "xyz"}]
        }));
        assert_eq!(out["request"]["headers"]["Cookie"], REDACTED);
        assert_eq!(out["request"]["headers"]["accept"], "json");
        assert_eq!(out["items"][0]["client_secret"], REDACTED);
    }

    #[test]
    fn test_matching_key_stops_descent() {
        let out = sanitize(json!({"session": {"id": 1, "user": "bob"}}));
        assert_eq!(out["session"], REDACTED);
    }

    #[test]
    fn test_bearer_token_scrubbed() {
        let out = sanitize(json!({"note": "sent Bearer eyJhbGciOiJIUzI1NiJ9.abc== to api"}));
        assert_eq!(out["note"], "sent Bearer [REDACTED] to api");
    }

    #[test]
    fn test_authorization_line_scrubbed() {
        let out = sanitize(json!({"raw": "GET /\nauthorization: Basic dXNlcjpwYXNz\nHost: x"}));
        assert_eq!(out["raw"], "GET /\nauthorization: [REDACTED]\nHost: x");
    }

    #[test]
    fn test_scalar_context_wrapped() {
        assert_eq!(sanitize(json!("hello")), json!({"value": "hello"}));
        assert_eq!(sanitize(json!(42)), json!({"value": "42"}));
        assert_eq!(sanitize(json!(true)), json!({"value": "true"}));
    }

    #[test]
    fn test_empty_and_null_context() {
        let sanitizer = ContextSanitizer::default();
        assert_eq!(sanitizer.sanitize(Context::Empty), json!({}));
        assert_eq!(sanitizer.sanitize(Context::from(Value::Null)), json!({}));
        assert!(is_empty_context(&json!({})));
        assert!(is_empty_context(&json!([])));
        assert!(!is_empty_context(&json!({"a": 1})));
    }

    #[test]
    fn test_structured_error_normalized() {
        let err =
            StructuredError::new("http_request_failed", "timeout").with_data(json!({"secs": 5}));
        let out = ContextSanitizer::default().sanitize(Context::from(err));
        assert_eq!(out["code"], "http_request_failed");
        assert_eq!(out["message"], "timeout");
        assert_eq!(out["data"]["secs"], 5);
        assert_eq!(out["all"]["http_request_failed"][0], "timeout");
    }

    #[test]
    fn test_serializable_object_flattened() {
        #[derive(Serialize)]
        struct Request {
            url: String,
            api_key: String,
        }
        let ctx = Context::from_serialize(&Request {
            url: "https://example.com".into(),
            api_key: "abc".into(),
        });
        let out = ContextSanitizer::default().sanitize(ctx);
        assert_eq!(out, json!({"url": "https://example.com", "api_key": REDACTED}));
    }

    #[test]
    fn test_unserializable_object_degrades() {
        use std::collections::HashMap;
        let mut map: HashMap<(u8, u8), u8> = HashMap::new();
        map.insert((1, 2), 3);
        let out = ContextSanitizer::default().sanitize(Context::from_serialize(&map));
        assert!(out["value"].as_str().unwrap().starts_with("<unserializable"));
    }

    #[test]
    fn test_custom_sensitive_key() {
        let sanitizer = ContextSanitizer::new(vec!["iban".into()]);
        let out =
            sanitizer.sanitize(Context::from(json!({"IBAN_number": "DE00", "password": "p"})));
        assert_eq!(out["IBAN_number"], REDACTED);
        assert_eq!(out["password"], "p");
    }

    #[test]
    fn test_sibling_values_only_scrubbed_by_patterns() {
        let out = sanitize(json!({"note": "the password is hunter2"}));
        assert_eq!(out["note"], "the password is hunter2");
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let mut value = json!("leaf");
        for _ in 0..(MAX_DEPTH + 10) {
            value = json!([value]);
        }
        let out = sanitize(value);
        assert!(out.is_array());
    }

    #[test]
    fn test_scrub_string_no_match_borrows() {
        let sanitizer = ContextSanitizer::default();
        assert!(matches!(sanitizer.scrub_string("plain text"), Cow::Borrowed(_)));
    }
}
