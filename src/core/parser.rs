use crate::domain::model::ResponseFormat;
use crate::utils::error::{EtlError, Result};
use serde_json::Value;
use std::collections::HashMap;

type FieldList = Vec<(String, String)>;

/// Extracts the declared output columns from a raw completion. The primary
/// strategy follows the configured response format; when it yields none of
/// the declared columns, the other format is tried before giving up. A reply
/// in which no declared column can be found at all is a parse error.
pub fn parse_response(
    raw: &str,
    output_columns: &[String],
    format: ResponseFormat,
) -> Result<HashMap<String, String>> {
    let cleaned = strip_reasoning(raw);
    let text = cleaned.trim();

    let strategies: [fn(&str) -> Option<FieldList>; 2] = match format {
        ResponseFormat::Json => [parse_json_fields, parse_key_value_fields],
        ResponseFormat::KeyValue => [parse_key_value_fields, parse_json_fields],
    };

    for strategy in strategies {
        if let Some(fields) = strategy(text) {
            let projected = project_columns(&fields, output_columns);
            if !projected.is_empty() {
                return Ok(projected);
            }
        }
    }

    Err(EtlError::ParseError {
        message: format!(
            "no declared output field found in reply ({} bytes)",
            raw.len()
        ),
    })
}

/// Reasoning models wrap deliberation in think tags; drop those spans before
/// looking for structured output.
fn strip_reasoning(raw: &str) -> String {
    let mut text = raw.to_string();
    while let (Some(start), Some(end)) = (text.find("<think>"), text.find("</think>")) {
        if end < start {
            break;
        }
        text.replace_range(start..end + "</think>".len(), "");
    }
    text
}

// JSON 模式：直接解析 → 圍欄區塊 → 大括號切片
fn parse_json_fields(text: &str) -> Option<FieldList> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if let Some(fields) = fields_from_json(&value) {
            return Some(fields);
        }
    }

    if let Some(block) = extract_fenced_block(text) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            if let Some(fields) = fields_from_json(&value) {
                return Some(fields);
            }
        }
    }

    if let Some(slice) = extract_braced(text) {
        if let Ok(value) = serde_json::from_str::<Value>(slice) {
            if let Some(fields) = fields_from_json(&value) {
                return Some(fields);
            }
        }
    }

    None
}

fn fields_from_json(value: &Value) -> Option<FieldList> {
    let object = value.as_object()?;
    let mut fields = Vec::with_capacity(object.len());

    for (key, value) in object {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        fields.push((key.clone(), rendered));
    }

    Some(fields)
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    for marker in ["```json", "```JSON", "```"] {
        if let Some(start) = text.find(marker) {
            let rest = &text[start + marker.len()..];
            if let Some(end) = rest.find("```") {
                return Some(rest[..end].trim());
            }
        }
    }
    None
}

fn extract_braced(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

// Key-value 模式：逐行以冒號分割，容忍全形冒號、引號、粗體與清單符號
fn parse_key_value_fields(text: &str) -> Option<FieldList> {
    let mut fields = Vec::new();

    for line in text.lines() {
        let Some((separator_index, separator)) = line
            .char_indices()
            .find(|(_, c)| *c == ':' || *c == '：')
        else {
            continue;
        };

        let key = clean_key(&line[..separator_index]);
        let value = clean_value(&line[separator_index + separator.len_utf8()..]);

        if !key.is_empty() {
            fields.push((key, value));
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn clean_key(key: &str) -> String {
    key.replace("**", "")
        .trim()
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_whitespace())
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}

fn clean_value(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_suffix(',').unwrap_or(value).trim();
    value
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}

/// Projects parsed fields onto the declared columns. Matching tolerates case
/// and surrounding whitespace; declared columns absent from the fields are
/// simply left out of the map (the aggregator writes the gap marker).
fn project_columns(fields: &FieldList, output_columns: &[String]) -> HashMap<String, String> {
    let mut projected = HashMap::new();

    for column in output_columns {
        let want = column.trim().to_lowercase();
        if let Some((_, value)) = fields
            .iter()
            .find(|(name, _)| name.trim().to_lowercase() == want)
        {
            projected.insert(column.clone(), value.clone());
        }
    }

    projected
}
