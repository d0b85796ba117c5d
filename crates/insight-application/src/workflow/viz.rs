//! Chart preparation: what the model sees and what the sandbox receives.

use insight_core::query::Rows;
use insight_core::sandbox::DataBindings;
use insight_core::workflow::ExecutionPlan;
use insight_interaction::strip_code_fences;
use serde_json::Value;

/// Rows shown in full in a data summary; larger results are sampled.
const FULL_DATA_ROWS: usize = 5;
const SAMPLE_ROWS: usize = 3;

/// Sandbox variable name for a 1-based step number.
pub fn binding_name(step_number: usize) -> String {
    format!("step_{step_number}")
}

/// Successful step results in plan order, keyed by step number.
pub fn successful_results(plan: &ExecutionPlan) -> Vec<(usize, &str, Option<&str>, &Rows)> {
    plan.succeeded()
        .filter_map(|(number, step)| {
            step.result
                .as_ref()
                .map(|rows| (number, step.description.as_str(), step.query.as_deref(), rows))
        })
        .collect()
}

pub fn has_chart_worthy_result(plan: &ExecutionPlan) -> bool {
    successful_results(plan)
        .iter()
        .any(|(_, _, _, rows)| rows.is_chart_worthy())
}

/// `{"step_1": [records...], ...}` for every successful step.
pub fn bindings(plan: &ExecutionPlan) -> DataBindings {
    successful_results(plan)
        .into_iter()
        .map(|(number, _, _, rows)| (binding_name(number), Value::Array(rows.records())))
        .collect()
}

/// Per-step description, query, row count, columns, numeric ranges and sample rows.
pub fn data_summary(plan: &ExecutionPlan) -> String {
    let mut lines = Vec::new();
    for (number, description, query, rows) in successful_results(plan) {
        lines.push(format!("DATA['{}'] - {description}", binding_name(number)));
        if let Some(query) = query {
            lines.push(format!("  SQL: {query}"));
        }
        lines.push(format!("  Rows: {}", rows.len()));
        lines.push(format!("  Columns: {}", rows.columns.join(", ")));
        for column in rows.numeric_columns() {
            if let Some((min, max)) = rows.numeric_range(column) {
                lines.push(format!("    {column}: min={min}, max={max}"));
            }
        }
        let (label, records) = if rows.len() <= FULL_DATA_ROWS {
            ("Data", rows.records())
        } else {
            ("Sample", rows.sample(SAMPLE_ROWS))
        };
        lines.push(format!("  {label}: {}", Value::Array(records)));
    }
    lines.join("\n")
}

/// Strips fences, `plt.show()` and plotting-library imports from model output.
///
/// Returns `None` when nothing runnable is left or the model answered `pass`.
pub fn clean_chart_code(raw: &str) -> Option<String> {
    let code = strip_code_fences(raw)
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !(trimmed == "plt.show()"
                || trimmed.starts_with("import matplotlib")
                || trimmed.starts_with("from matplotlib")
                || trimmed.starts_with("import numpy")
                || trimmed.starts_with("from numpy"))
        })
        .collect::<Vec<_>>()
        .join("\n");

    let code = code.trim();
    if code.is_empty() || code == "pass" {
        None
    } else {
        Some(code.to_string())
    }
}
