use std::borrow::Cow;
use std::collections::HashSet;

use comfy_table::{Table, presets::ASCII_BORDERS_ONLY_CONDENSED};

use super::RecordTable;

/// Maximum width for free-text columns (messages, tags)
const MAX_WIDE_COLUMN_WIDTH: usize = 60;

/// Columns that should have width limits in table mode
const WIDE_COLUMNS: &[&str] = &["message", "tags"];

/// Truncate a string to max_len chars, adding "..." if truncated
fn truncate_value(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        Cow::Borrowed(s)
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        Cow::Owned(format!("{}...", truncated))
    }
}

pub struct TableFormatter;

impl TableFormatter {
    pub fn format(result: &RecordTable) -> String {
        if result.rows.is_empty() {
            return "(0 rows)".to_string();
        }

        let mut table = Table::new();
        table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);

        let truncate_cols: HashSet<usize> = result
            .columns
            .iter()
            .enumerate()
            .filter(|(_, col)| WIDE_COLUMNS.contains(*col))
            .map(|(idx, _)| idx)
            .collect();

        table.set_header(result.columns);

        for row in &result.rows {
            let cells: Vec<Cow<'_, str>> = row
                .iter()
                .enumerate()
                .map(|(idx, val)| {
                    if truncate_cols.contains(&idx) {
                        truncate_value(val, MAX_WIDE_COLUMN_WIDTH)
                    } else {
                        Cow::Borrowed(val.as_str())
                    }
                })
                .collect();
            table.add_row(cells);
        }

        let output = table.to_string();
        format!("{}\n({} rows)", output, result.rows.len())
    }

    /// `key: value` block for a single item, keys right-padded to align
    pub fn format_summary(pairs: &[(String, String)]) -> String {
        let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        pairs
            .iter()
            .map(|(key, value)| format!("{:<width$}  {}", format!("{}:", key), value, width = width + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &'static [&'static str], rows: Vec<Vec<String>>) -> RecordTable {
        RecordTable { columns, rows }
    }

    #[test]
    fn test_truncate_value_short() {
        let result = truncate_value("hello", 10);
        assert_eq!(result, "hello");
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncate_value_unicode() {
        let unicode = "日本語テストです長い文字列";
        let result = truncate_value(unicode, 8);
        assert!(result.chars().count() <= 8);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn test_message_column_truncated() {
        let result = table(
            &["timestamp", "message"],
            vec![vec!["2024-01-01 00:00:00".to_string(), "a".repeat(80)]],
        );
        let output = TableFormatter::format(&result);
        assert!(!output.contains(&"a".repeat(80)));
        assert!(output.contains("..."));
    }

    #[test]
    fn test_id_column_not_truncated() {
        let result = table(&["run_id", "status"], vec![vec!["a".repeat(80), "SUCCESS".into()]]);
        let output = TableFormatter::format(&result);
        assert!(output.contains(&"a".repeat(80)));
        assert!(output.ends_with("(1 rows)"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(TableFormatter::format(&table(&["run_id"], Vec::new())), "(0 rows)");
    }

    #[test]
    fn test_summary_alignment() {
        let pairs = vec![
            ("run_id".to_string(), "abc".to_string()),
            ("status".to_string(), "SUCCESS".to_string()),
            ("job_name".to_string(), "etl".to_string()),
        ];
        let output = TableFormatter::format_summary(&pairs);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "run_id:    abc");
        assert_eq!(lines[2], "job_name:  etl");
    }
}
