use anyhow::Result;
use colored::Colorize;
use insight_application::SessionUseCase;
use insight_core::session::TurnRole;

pub async fn list(sessions: &SessionUseCase) -> Result<()> {
    let all = sessions.list_sessions().await?;
    if all.is_empty() {
        println!("No sessions yet. Start one with `insight ask \"...\"`.");
        return Ok(());
    }
    for session in all {
        println!(
            "{}  {}  {} ({} questions)",
            session.id.dimmed(),
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.title.bold(),
            session.user_turn_count()
        );
    }
    Ok(())
}

pub async fn show(sessions: &SessionUseCase, id: &str, with_trace: bool) -> Result<()> {
    let session = sessions.get_session(id).await?;
    println!("{}", session.title.bold());
    println!(
        "{}",
        format!("created {}", session.created_at.format("%Y-%m-%d %H:%M")).dimmed()
    );

    for turn in &session.turns {
        println!();
        match turn.role {
            TurnRole::User => println!("{} {}", "You:".green().bold(), turn.content),
            TurnRole::Assistant => {
                println!("{} {}", "Insight:".blue().bold(), turn.content);
                for query in &turn.queries {
                    println!("  {}", query.cyan());
                }
                if !turn.visualizations.is_empty() {
                    println!("  ({} chart(s))", turn.visualizations.len());
                }
                if let Some(error) = &turn.error {
                    println!("  {} {}", "Warning:".yellow(), error);
                }
                if with_trace && let Some(trace) = &turn.trace {
                    super::print_trace(trace);
                }
            }
        }
    }
    Ok(())
}

pub async fn rename(sessions: &SessionUseCase, id: &str, title: &str) -> Result<()> {
    let session = sessions.rename_session(id, title).await?;
    println!("Renamed {} to {}", session.id.dimmed(), session.title.bold());
    Ok(())
}

pub async fn delete(sessions: &SessionUseCase, id: &str) -> Result<()> {
    sessions.delete_session(id).await?;
    println!("Deleted session {}", id);
    Ok(())
}
