//! Field-level checks on raw request bodies.
//!
//! Checks run on the untyped JSON so that every violated field is reported at
//! once; only a body that passes them is deserialized.

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult, FieldError};
use crate::model::{
    GenerationKind, GenerationRequest, ModelId, StreamBookContext, StreamRequest,
};

pub const INVALID_GENERATION: &str = "Invalid request data";
pub const INVALID_STREAM: &str =
    "Invalid request body: prompt, bookContext.genre, and bookContext.style are required.";
pub const UNREADABLE_BODY: &str = "Failed to process request";

pub const MAX_CONTEXT_CHARS: usize = 10_000;
pub const MAX_TOKENS: u64 = 4_000;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Parse a request body; syntax errors become a validation error on the root
/// path carrying the route's own `message`.
pub fn parse_body(bytes: &[u8], message: &str) -> CoreResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| CoreError::validation(message, vec![FieldError::new("", e.to_string())]))
}

#[derive(Default)]
struct Report {
    errors: Vec<FieldError>,
}

impl Report {
    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(path, message));
    }

    fn object<'a>(&mut self, parent: &'a Map<String, Value>, key: &str, path: &str) -> Option<&'a Map<String, Value>> {
        match parent.get(key) {
            Some(Value::Object(o)) => Some(o),
            Some(_) => {
                self.push(path, "expected an object");
                None
            }
            None => {
                self.push(path, "required");
                None
            }
        }
    }

    fn string<'a>(&mut self, parent: &'a Map<String, Value>, key: &str, path: &str) -> Option<&'a str> {
        match parent.get(key) {
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.push(path, "expected a string");
                None
            }
            None => {
                self.push(path, "required");
                None
            }
        }
    }

    fn one_of(&mut self, parent: &Map<String, Value>, key: &str, allowed: &[&str]) {
        if let Some(s) = self.string(parent, key, key)
            && !allowed.contains(&s)
        {
            self.push(key, format!("must be one of: {}", allowed.join(", ")));
        }
    }
}

pub fn validate_generation(body: &Value) -> CoreResult<GenerationRequest> {
    let Some(root) = body.as_object() else {
        return Err(CoreError::validation(
            INVALID_GENERATION,
            vec![FieldError::new("", "expected an object")],
        ));
    };
    let mut r = Report::default();

    r.one_of(root, "type", &GenerationKind::ALL);
    if let Some(context) = r.string(root, "context", "context") {
        if context.trim().is_empty() {
            r.push("context", "must not be empty");
        } else if context.chars().count() > MAX_CONTEXT_CHARS {
            r.push("context", format!("must be at most {MAX_CONTEXT_CHARS} characters"));
        }
    }
    r.one_of(root, "model", &ModelId::ALL);

    if let Some(book) = r.object(root, "bookContext", "bookContext") {
        r.string(book, "genre", "bookContext.genre");
        r.string(book, "style", "bookContext.style");
        match book.get("characters") {
            None | Some(Value::Null) | Some(Value::Array(_)) => {}
            Some(_) => r.push("bookContext.characters", "expected an array"),
        }
        match book.get("plotSummary") {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => r.push("bookContext.plotSummary", "expected a string"),
        }
    }

    if let Some(settings) = r.object(root, "settings", "settings") {
        match settings.get("temperature") {
            Some(Value::Number(n)) => {
                let t = n.as_f64().unwrap_or(f64::NAN);
                if !(0.0..=MAX_TEMPERATURE).contains(&t) {
                    r.push("settings.temperature", format!("must be between 0 and {MAX_TEMPERATURE}"));
                }
            }
            Some(_) => r.push("settings.temperature", "expected a number"),
            None => r.push("settings.temperature", "required"),
        }
        match settings.get("maxTokens") {
            Some(Value::Number(n)) => match n.as_u64() {
                Some(m) if (1..=MAX_TOKENS).contains(&m) => {}
                Some(_) => r.push("settings.maxTokens", format!("must be between 1 and {MAX_TOKENS}")),
                None if n.as_i64().is_some() => {
                    r.push("settings.maxTokens", format!("must be between 1 and {MAX_TOKENS}"))
                }
                None => r.push("settings.maxTokens", "expected an integer"),
            },
            Some(_) => r.push("settings.maxTokens", "expected an integer"),
            None => r.push("settings.maxTokens", "required"),
        }
        match settings.get("streaming") {
            Some(Value::Bool(_)) => {}
            Some(_) => r.push("settings.streaming", "expected a boolean"),
            None => r.push("settings.streaming", "required"),
        }
    }

    if !r.errors.is_empty() {
        return Err(CoreError::validation(INVALID_GENERATION, r.errors));
    }
    serde_json::from_value(body.clone()).map_err(|e| {
        CoreError::validation(INVALID_GENERATION, vec![FieldError::new("", e.to_string())])
    })
}

pub fn validate_stream(body: &Value) -> CoreResult<StreamRequest> {
    fn required<'a>(v: Option<&'a Value>, path: &str, errors: &mut Vec<FieldError>) -> Option<&'a str> {
        match v.and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => Some(s),
            _ => {
                errors.push(FieldError::new(path, "required non-empty string"));
                None
            }
        }
    }

    let mut errors = Vec::new();
    let book = body.get("bookContext");
    let prompt = required(body.get("prompt"), "prompt", &mut errors);
    let genre = required(book.and_then(|b| b.get("genre")), "bookContext.genre", &mut errors);
    let style = required(book.and_then(|b| b.get("style")), "bookContext.style", &mut errors);

    match (prompt, genre, style) {
        (Some(prompt), Some(genre), Some(style)) => Ok(StreamRequest {
            prompt: prompt.to_string(),
            book_context: StreamBookContext {
                genre: genre.to_string(),
                style: style.to_string(),
            },
        }),
        _ => Err(CoreError::validation(INVALID_STREAM, errors)),
    }
}
