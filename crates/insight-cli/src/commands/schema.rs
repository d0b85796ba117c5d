use anyhow::Result;
use colored::Colorize;
use insight_application::SessionUseCase;

pub fn show(sessions: &SessionUseCase, json: bool) -> Result<()> {
    let schema = sessions.schema();
    if json {
        println!("{}", serde_json::to_string_pretty(schema)?);
        return Ok(());
    }

    println!("{} {}", "Table:".bold(), schema.table_name);
    if !schema.description.is_empty() {
        println!("{}", schema.description);
    }
    println!();
    for column in &schema.columns {
        let nullable = if column.nullable { " (nullable)" } else { "" };
        println!(
            "  {} {:<10}{} {}",
            format!("{:<28}", column.column_name()).cyan(),
            column.data_type,
            nullable.dimmed(),
            column.description
        );
    }
    if !schema.important_notes.is_empty() {
        println!();
        println!("{}", "Notes:".bold());
        for note in &schema.important_notes {
            println!("  - {note}");
        }
    }
    Ok(())
}
