use crate::domain::model::{ResponseFormat, Row};
use crate::utils::error::{EtlError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Marker replaced by the rendered row content inside the prompt template.
pub const CONTENT_PLACEHOLDER: &str = "{{content}}";

// 匹配 {row['欄位名']} 佔位符
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{row\['([^']+)'\]\}").unwrap())
}

/// Substitutes every `{row['Col']}` placeholder with the row's cell value.
/// A placeholder naming a column the row does not have is an error.
pub fn render_content(row: &Row, content_template: &str) -> Result<String> {
    let mut missing: Option<String> = None;

    let rendered = placeholder_regex().replace_all(content_template, |caps: &regex::Captures| {
        let column = &caps[1];
        match row.cell(column) {
            Some(value) => value.to_string(),
            None => {
                if missing.is_none() {
                    missing = Some(column.to_string());
                }
                String::new()
            }
        }
    });

    if let Some(column) = missing {
        return Err(EtlError::TemplateError { column });
    }

    Ok(rendered.into_owned())
}

/// Replaces every `{{content}}` occurrence with the rendered content. A
/// template without the placeholder is used verbatim; the engine warns about
/// that once during pre-flight.
pub fn render_prompt(content: &str, prompt_template: &str) -> String {
    prompt_template.replace(CONTENT_PLACEHOLDER, content)
}

/// Columns referenced by a content template, first occurrence order,
/// deduplicated. Used for pre-flight validation against the sheet header.
pub fn template_columns(content_template: &str) -> Vec<String> {
    let mut columns = Vec::new();
    for caps in placeholder_regex().captures_iter(content_template) {
        let name = caps[1].to_string();
        if !columns.contains(&name) {
            columns.push(name);
        }
    }
    columns
}

/// Reply-shape instruction appended to every prompt, derived from the
/// declared output columns and the configured response format.
pub fn format_instruction(output_columns: &[String], format: ResponseFormat) -> String {
    match format {
        ResponseFormat::Json => {
            let fields = output_columns
                .iter()
                .map(|column| format!("\"{}\": \"...\"", column))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "\n\nPlease provide the output in a single, valid JSON object format, like this: {{{}}}. Do not include any text or formatting outside of the JSON object.",
                fields
            )
        }
        ResponseFormat::KeyValue => {
            let mut instruction = String::from("\n严格按照以下格式回复，不要回复任何额外内容：\n");
            for column in output_columns {
                instruction.push_str(&format!("{}:\"{}\"\n", column, column));
            }
            instruction
        }
    }
}
