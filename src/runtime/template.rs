/// Template rendering and payload helpers for step inputs
///
/// Step `with` values may reference the run context with `{{ path }}` markers, where
/// `path` is a dotted path such as `steps.create.outputs.channelId` or an input field
/// name. A leading dot is accepted (`{{ .steps.create.outputs.channelId }}`).
///
/// A string consisting of a single marker is replaced by the referenced value with
/// its JSON type intact. Markers embedded in longer strings are replaced by the
/// value's text form.
///
/// Path segments may contain single or double quotes, but not both.

use crate::error::{Error, Result};
use crate::workflow::Payload;
use serde::Serialize;
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Convert any serializable input into a string-keyed map by structural round trip
///
/// `null` becomes an empty map; any other non-object value is rejected.
pub fn to_json_map<T: Serialize + ?Sized>(input: &T) -> Result<Payload> {
    match serde_json::to_value(input)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Payload::new()),
        other => Err(Error::InvalidInput(type_name(&other).to_string())),
    }
}

/// Shallow merge; keys from later maps replace keys from earlier ones
pub fn merge_maps(maps: &[&Payload]) -> Payload {
    let mut merged = Payload::new();
    for map in maps {
        for (key, value) in map.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Render every templated field of `fields` in place against `context`
///
/// Nested objects and arrays are rendered recursively. Values without markers are
/// left untouched.
pub fn render_template_fields(context: &Payload, fields: &mut Payload) -> Result<()> {
    let context = Value::Object(context.clone());
    for value in fields.values_mut() {
        render_value(&context, value)?;
    }
    Ok(())
}

fn render_value(context: &Value, value: &mut Value) -> Result<()> {
    match value {
        Value::String(text) => {
            if let Some(rendered) = render_string(context, text)? {
                *value = rendered;
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                render_value(context, item)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                render_value(context, item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Returns `None` when the string has no markers
fn render_string(context: &Value, text: &str) -> Result<Option<Value>> {
    if !text.contains(OPEN) {
        return Ok(None);
    }

    if let Some(expression) = single_marker(text) {
        return lookup(context, expression).map(Some);
    }

    let mut rendered = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };

        rendered.push_str(&rest[..start]);
        let value = lookup(context, &after_open[..end])?;
        rendered.push_str(&value_to_string(&value));
        rest = &after_open[end + CLOSE.len()..];
    }
    rendered.push_str(rest);

    Ok(Some(Value::String(rendered)))
}

/// Inner expression when `text` is exactly one `{{ ... }}` marker
fn single_marker(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        None
    } else {
        Some(inner)
    }
}

/// Resolve a dotted path against the context using a bracketed JSONPath query
fn lookup(context: &Value, expression: &str) -> Result<Value> {
    let unresolved = || Error::TemplateResolution {
        expression: expression.trim().to_string(),
    };

    let path = expression.trim().trim_start_matches('.');
    if path.is_empty() {
        return Err(unresolved());
    }

    let mut query = String::from("$");
    for segment in path.split('.') {
        let quote = if !segment.contains('\'') {
            '\''
        } else if !segment.contains('"') {
            '"'
        } else {
            return Err(unresolved());
        };
        // A trailing backslash would escape the closing quote
        if segment.is_empty() || segment.ends_with('\\') {
            return Err(unresolved());
        }
        query.push('[');
        query.push(quote);
        query.push_str(segment);
        query.push(quote);
        query.push(']');
    }

    let selected = jsonpath_lib::select(context, &query).map_err(|_| unresolved())?;
    selected.first().map(|value| (*value).clone()).ok_or_else(unresolved)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
