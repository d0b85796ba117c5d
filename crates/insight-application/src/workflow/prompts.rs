//! Prompt templates for every language-model call made during a turn.
//!
//! Each [`LlmTask`] owns a system template and a user template. Both are
//! rendered with the same context so a call site only assembles values once.

use insight_core::llm::{CompletionRequest, LlmTask};
use insight_core::session::{Turn, TurnRole};
use minijinja::{Environment, Value};

const ANALYZE_SYSTEM: &str = r#"You are a senior data analyst. You write precise SQLite queries to answer questions about the dataset described below.

{{ schema }}

Your task: create a MINIMAL execution plan as JSON. Each step computes final numbers directly (percentages, rates, rankings, comparisons) so the answer can be read straight from the results.

Return JSON:
{"steps": [{"description": "What this step computes", "query": "SQL query computing the final metric (optional)"}], "reasoning": "One-line approach summary"}

QUERY GUIDELINES:
- Compute percentages, rates, averages and ranks directly in SQL using ROUND().
- Use CTEs or subqueries for complex calculations.
- ORDER BY the key metric DESC so the top result comes first.
- LIMIT results to what is needed (top 5, top 10, ...).
- Use meaningful column aliases (failure_rate_pct, total_volume, avg_value).

PLAN GUIDELINES:
- Only use columns that exist in the schema. Never invent column names.
- Most questions need exactly one step. Use the fewest steps possible.
- Different grouping dimensions belong in separate steps, one result set each.

CONVERSATIONAL QUESTIONS:
If the question is about the dataset itself, about you, or otherwise needs no query, return:
{"steps": [], "reasoning": "Conversational question", "conversational_answer": "<your direct answer>"}
"#;

const ANALYZE_USER: &str = r#"{% if history %}
Conversation so far:
{{ history }}

{% endif %}
User question: {{ query }}

Create the analysis plan (JSON):"#;

const QUERY_SYSTEM: &str = r#"You are a senior data analyst writing SQLite queries.

{{ schema }}

RULES:
- Return ONLY the SQL query. No explanation, no markdown.
- Use exact column names from the schema above.
- Compute the final metric in SQL; do not return raw rows when an aggregate answers the step.
- The query must be read-only.
"#;

const QUERY_USER: &str = r#"Original user question: {{ query }}

Step {{ step_number }} of {{ step_count }}: {{ description }}

Write the SQL query for this step:"#;

const REPAIR_SYSTEM: &str = r#"You are a SQL debugging expert. Fix the SQLite query that failed.

{{ schema }}

RULES:
- Return ONLY the corrected SQL query. No explanation, no markdown.
- Use exact column names from the schema above.
- Fix the specific error reported.
"#;

const REPAIR_USER: &str = r#"Original user question: {{ query }}

Step: {{ description }}

Failed SQL query:
{{ failed_query }}

Error message:
{{ error }}

Write the corrected SQL query:"#;

const CHART_SYSTEM: &str = r#"You are a data visualization expert. You write matplotlib code that produces clear, compact charts.

RULES:
1. Query results are available in a `DATA` dict: DATA['step_1'], DATA['step_2'], ... Each entry is a list of row objects.
2. Create one `plt.figure()` per distinct analysis. Do not use subplots.
3. Bar charts for categories, line charts for time series, pie charts for proportions.
4. Keep figures compact: figsize=(5, 3).
5. Add titles, axis labels and value labels where practical.
6. Sort bars by value unless the categories have a natural order (days, hours, buckets).
7. Never plot metrics with very different magnitudes on one axis; use ax.twinx().

AVAILABLE (already imported, do NOT import anything): plt (matplotlib.pyplot), ticker (matplotlib.ticker), np (numpy), DATA.
Never call plt.show(); figures are captured automatically.

OUTPUT: raw Python code only. If the data is a single scalar value, output exactly: pass
"#;

const CHART_USER: &str = r#"User question: {{ query }}

Available data:
{{ data_summary }}

Write matplotlib code to visualize this data:"#;

const CHART_REPAIR_USER: &str = r#"The following matplotlib code failed. Fix it.

CODE:
{{ code }}

ERROR:
{{ error }}

DATA KEYS: {{ data_keys | join(", ") }}

Available data:
{{ data_summary }}

Return ONLY the fixed Python code."#;

const ANSWER_SYSTEM: &str = r#"You are a senior data analyst presenting findings to business leadership.

RESPONSE FORMAT:
- Give the direct answer first, with specific numbers and percentages.
- Rank or compare results clearly and give the baseline or average when showing breakdowns.
- Quantify comparisons ("2.3x higher", "1.8 percentage points above average").
- Call out anomalies such as 0%, 100% or extreme outliers.
- Keep it to 2-5 sentences. No preamble, never mention SQL, queries or datasets.
- Use only numbers from the results below. Simple derived math (averages, ratios, deltas) is allowed.
"#;

const ANSWER_USER: &str = r#"Question: {{ query }}
{% if results %}

Data:
{% for step in results %}

--- {{ step.description }} ---
Returned {{ step.row_count }} rows
{{ step.label }}: {{ step.records }}
{% endfor %}
{% else %}

No query results are available. If this is a conversational question, answer it directly. Otherwise explain that the data could not be retrieved.
{% endif %}
{% if failed %}

These steps could not be completed; mention that their numbers are missing:
{% for step in failed %}
- {{ step }}
{% endfor %}
{% endif %}

Answer with specific numbers from the data above:"#;

const TEMPLATES: &[(&str, &str)] = &[
    ("analyze.system", ANALYZE_SYSTEM),
    ("analyze.user", ANALYZE_USER),
    ("query.system", QUERY_SYSTEM),
    ("query.user", QUERY_USER),
    ("repair.system", REPAIR_SYSTEM),
    ("repair.user", REPAIR_USER),
    ("chart.system", CHART_SYSTEM),
    ("chart.user", CHART_USER),
    ("chart_repair.user", CHART_REPAIR_USER),
    ("answer.system", ANSWER_SYSTEM),
    ("answer.user", ANSWER_USER),
];

fn template_names(task: LlmTask) -> (&'static str, &'static str) {
    match task {
        LlmTask::Analyze => ("analyze.system", "analyze.user"),
        LlmTask::GenerateQuery => ("query.system", "query.user"),
        LlmTask::RepairQuery => ("repair.system", "repair.user"),
        LlmTask::ChartCode => ("chart.system", "chart.user"),
        LlmTask::RepairChart => ("chart.system", "chart_repair.user"),
        LlmTask::Answer => ("answer.system", "answer.user"),
    }
}

/// Compiled prompt templates.
pub struct PromptLibrary {
    env: Environment<'static>,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    /// Renders the system and user templates of `task` into a request.
    pub fn request(&self, task: LlmTask, ctx: Value) -> Result<CompletionRequest, minijinja::Error> {
        let (system, user) = template_names(task);
        let system = self.env.get_template(system)?.render(&ctx)?;
        let prompt = self.env.get_template(user)?.render(&ctx)?;
        Ok(CompletionRequest::new(task, system, prompt))
    }
}

/// Renders the most recent turns, newest kept first, within `max_chars`.
///
/// Assistant turns without content (failed turns) are skipped. When even the
/// newest line does not fit it is truncated rather than dropped.
pub fn render_history(turns: &[Turn], max_turns: usize, max_chars: usize) -> String {
    let mut lines = Vec::new();
    let mut used = 0usize;

    for turn in turns.iter().rev().take(max_turns) {
        if turn.content.trim().is_empty() {
            continue;
        }
        let speaker = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        let line = format!(
            "{speaker}: {}",
            turn.content.split_whitespace().collect::<Vec<_>>().join(" ")
        );
        let len = line.chars().count();
        let separator = usize::from(!lines.is_empty());

        if used + separator + len > max_chars {
            if lines.is_empty() && max_chars > 3 {
                let mut cut: String = line.chars().take(max_chars - 3).collect();
                cut.push_str("...");
                lines.push(cut);
            }
            break;
        }
        used += separator + len;
        lines.push(line);
    }

    lines.reverse();
    lines.join("\n")
}
