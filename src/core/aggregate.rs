use crate::config::job::JobConfig;
use crate::domain::model::{
    Row, RowOutcome, RowResult, Sheet, SkipPolicy, FAILURE_MARKER_PREFIX, GAP_MARKER,
};
use std::collections::HashMap;

/// Reassembles per-row outcomes into the output sheet. The header is the
/// selected input columns in sheet order followed by the declared output
/// columns in declared order; rows keep input order. Completed rows get
/// parsed values with gap markers for missing fields, failed rows get a
/// failure marker in every output column, and skipped rows follow the
/// configured skip policy.
pub fn assemble_output(sheet: &Sheet, outcomes: &[RowOutcome], config: &JobConfig) -> Sheet {
    let mut columns: Vec<String> = sheet
        .columns
        .iter()
        .filter(|column| config.is_selected(column))
        .cloned()
        .collect();
    columns.extend(config.output.columns.iter().cloned());

    let outcome_by_index: HashMap<usize, &RowOutcome> =
        outcomes.iter().map(|o| (o.row_index, o)).collect();

    let mut rows = Vec::new();
    for row in &sheet.rows {
        match outcome_by_index.get(&row.index) {
            Some(outcome) => rows.push(merge_row(row, outcome, config)),
            None => {
                if config.skip_policy() == SkipPolicy::Passthrough {
                    rows.push(blank_output_row(row, config));
                }
            }
        }
    }

    Sheet {
        name: sheet.name.clone(),
        columns,
        rows,
    }
}

fn merge_row(row: &Row, outcome: &RowOutcome, config: &JobConfig) -> Row {
    let mut cells = row.cells.clone();

    match &outcome.result {
        RowResult::Completed(fields) => {
            for column in &config.output.columns {
                let value = fields
                    .get(column)
                    .cloned()
                    .unwrap_or_else(|| GAP_MARKER.to_string());
                cells.insert(column.clone(), value);
            }
        }
        RowResult::Failed(error) => {
            // 失敗原因直接寫進儲存格，讓結果檔可以自行說明
            let marker = format!("{} {}", FAILURE_MARKER_PREFIX, error);
            for column in &config.output.columns {
                cells.insert(column.clone(), marker.clone());
            }
        }
    }

    Row {
        index: row.index,
        cells,
    }
}

fn blank_output_row(row: &Row, config: &JobConfig) -> Row {
    let mut cells = row.cells.clone();
    for column in &config.output.columns {
        cells.insert(column.clone(), String::new());
    }

    Row {
        index: row.index,
        cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::EtlError;

    fn test_config(skip_policy: &str) -> JobConfig {
        JobConfig::from_toml_str(&format!(
            r#"
[job]
name = "aggregate-test"

[source]
file = "in.csv"

[source.columns]
"Name" = true
"Internal" = false

[api]
url = "https://api.example.com/v1/chat/completions"
key = "k"
model = "m"

[templates]
content = "{{row['Name']}}"
prompt = "{{{{content}}}}"

[processing]
skip_policy = "{skip_policy}"

[output]
file = "out.csv"
columns = ["Category", "Score"]
"#
        ))
        .unwrap()
    }

    fn input_sheet() -> Sheet {
        let columns = vec![
            "Name".to_string(),
            "Internal".to_string(),
            "Status".to_string(),
        ];
        let rows = (0..3)
            .map(|index| {
                let mut cells = HashMap::new();
                cells.insert("Name".to_string(), format!("item-{}", index));
                cells.insert("Internal".to_string(), "secret".to_string());
                cells.insert("Status".to_string(), "done".to_string());
                Row { index, cells }
            })
            .collect();

        Sheet {
            name: "input".to_string(),
            columns,
            rows,
        }
    }

    fn completed(row_index: usize, pairs: &[(&str, &str)]) -> RowOutcome {
        let fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RowOutcome {
            row_index,
            result: RowResult::Completed(fields),
        }
    }

    #[test]
    fn test_header_is_selected_inputs_then_declared_outputs() {
        let config = test_config("drop");
        let sheet = input_sheet();
        let outcomes = vec![
            completed(0, &[("Category", "A"), ("Score", "1")]),
            completed(1, &[("Category", "B"), ("Score", "2")]),
            completed(2, &[("Category", "C"), ("Score", "3")]),
        ];

        let output = assemble_output(&sheet, &outcomes, &config);

        assert_eq!(output.columns, vec!["Name", "Category", "Score"]);
        assert_eq!(output.rows.len(), 3);
        assert_eq!(output.rows[0].cell("Name"), Some("item-0"));
        assert_eq!(output.rows[0].cell("Category"), Some("A"));
    }

    #[test]
    fn test_rows_keep_input_order() {
        let config = test_config("drop");
        let sheet = input_sheet();
        // 故意用亂序的 outcome 輸入
        let outcomes = vec![
            completed(2, &[("Category", "C"), ("Score", "3")]),
            completed(0, &[("Category", "A"), ("Score", "1")]),
            completed(1, &[("Category", "B"), ("Score", "2")]),
        ];

        let output = assemble_output(&sheet, &outcomes, &config);

        let names: Vec<&str> = output.rows.iter().map(|r| r.cell("Name").unwrap()).collect();
        assert_eq!(names, vec!["item-0", "item-1", "item-2"]);
        let categories: Vec<&str> = output
            .rows
            .iter()
            .map(|r| r.cell("Category").unwrap())
            .collect();
        assert_eq!(categories, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_missing_field_becomes_gap_marker() {
        let config = test_config("drop");
        let sheet = input_sheet();
        let outcomes = vec![
            completed(0, &[("Category", "A")]),
            completed(1, &[("Category", "B"), ("Score", "2")]),
            completed(2, &[("Score", "3")]),
        ];

        let output = assemble_output(&sheet, &outcomes, &config);

        assert_eq!(output.rows[0].cell("Score"), Some(GAP_MARKER));
        assert_eq!(output.rows[1].cell("Score"), Some("2"));
        assert_eq!(output.rows[2].cell("Category"), Some(GAP_MARKER));
    }

    #[test]
    fn test_failed_row_gets_failure_marker_in_every_output_column() {
        let config = test_config("drop");
        let sheet = input_sheet();
        let outcomes = vec![
            completed(0, &[("Category", "A"), ("Score", "1")]),
            RowOutcome {
                row_index: 1,
                result: RowResult::Failed(EtlError::RateLimitError {
                    message: "429".to_string(),
                }),
            },
            completed(2, &[("Category", "C"), ("Score", "3")]),
        ];

        let output = assemble_output(&sheet, &outcomes, &config);

        let failed = &output.rows[1];
        let category = failed.cell("Category").unwrap();
        let score = failed.cell("Score").unwrap();
        assert!(category.starts_with(FAILURE_MARKER_PREFIX));
        assert!(category.contains("rate limit"));
        assert_eq!(category, score);

        // 其他列不受影響
        assert_eq!(output.rows[0].cell("Category"), Some("A"));
        assert_eq!(output.rows[2].cell("Category"), Some("C"));
    }

    #[test]
    fn test_drop_policy_omits_skipped_rows() {
        let config = test_config("drop");
        let sheet = input_sheet();
        // 第 1 列被跳過，沒有 outcome
        let outcomes = vec![
            completed(0, &[("Category", "A"), ("Score", "1")]),
            completed(2, &[("Category", "C"), ("Score", "3")]),
        ];

        let output = assemble_output(&sheet, &outcomes, &config);

        assert_eq!(output.rows.len(), 2);
        let names: Vec<&str> = output.rows.iter().map(|r| r.cell("Name").unwrap()).collect();
        assert_eq!(names, vec!["item-0", "item-2"]);
    }

    #[test]
    fn test_passthrough_policy_keeps_skipped_rows_with_blank_outputs() {
        let config = test_config("passthrough");
        let sheet = input_sheet();
        let outcomes = vec![
            completed(0, &[("Category", "A"), ("Score", "1")]),
            completed(2, &[("Category", "C"), ("Score", "3")]),
        ];

        let output = assemble_output(&sheet, &outcomes, &config);

        assert_eq!(output.rows.len(), 3);
        assert_eq!(output.rows[1].cell("Name"), Some("item-1"));
        assert_eq!(output.rows[1].cell("Category"), Some(""));
        assert_eq!(output.rows[1].cell("Score"), Some(""));
    }

    #[test]
    fn test_unselected_columns_not_in_header() {
        let config = test_config("drop");
        let sheet = input_sheet();
        let outcomes = vec![
            completed(0, &[("Category", "A"), ("Score", "1")]),
            completed(1, &[("Category", "B"), ("Score", "2")]),
            completed(2, &[("Category", "C"), ("Score", "3")]),
        ];

        let output = assemble_output(&sheet, &outcomes, &config);

        assert!(!output.columns.contains(&"Internal".to_string()));
        assert!(!output.columns.contains(&"Status".to_string()));
    }
}
