use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::Args;
use colored::Colorize;
use insight_application::{SessionUseCase, SubmitResponse};
use insight_core::InsightError;
use insight_core::llm::ProviderKind;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct AskArgs {
    /// The question, in plain language
    pub query: String,
    /// Continue an existing session
    #[arg(long, short)]
    pub session: Option<String>,
    /// Language model to try first (gemini or groq)
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderKind>,
    /// Print the full response as JSON
    #[arg(long)]
    pub json: bool,
    /// Print the execution trace after the answer
    #[arg(long)]
    pub trace: bool,
    /// Write charts as PNG files into this directory
    #[arg(long, value_name = "DIR")]
    pub save_charts: Option<PathBuf>,
}

fn parse_provider(value: &str) -> Result<ProviderKind, String> {
    value
        .parse()
        .map_err(|_| format!("unknown provider '{value}' (expected gemini or groq)"))
}

pub async fn run(sessions: &SessionUseCase, args: AskArgs) -> Result<()> {
    let token = CancellationToken::new();
    let interrupt = tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        }
    });

    let result = sessions
        .submit_query(args.session.as_deref(), &args.query, args.provider, &token)
        .await;
    interrupt.abort();

    let response = match result {
        Ok(response) => response,
        Err(InsightError::Cancelled) => {
            eprintln!("{}", "Cancelled. Nothing was saved.".yellow());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let saved = match &args.save_charts {
        Some(dir) => save_charts(dir, &response)?,
        None => Vec::new(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    print_response(&response, args.trace);
    for path in saved {
        println!("{} {}", "Chart saved:".green(), path.display());
    }
    Ok(())
}

fn print_response(response: &SubmitResponse, with_trace: bool) {
    println!("{}", response.answer);

    if !response.queries.is_empty() {
        println!();
        println!("{}", "Queries:".bold());
        for query in &response.queries {
            println!("  {}", query.cyan());
        }
    }
    if !response.visualizations.is_empty() {
        println!();
        println!(
            "{} chart(s) generated (use --save-charts DIR to write them)",
            response.visualizations.len()
        );
    }
    if let Some(error) = &response.error {
        println!();
        println!("{} {}", "Warning:".yellow().bold(), error);
    }
    if with_trace {
        println!();
        println!("{}", "Trace:".bold());
        super::print_trace(&response.trace);
    }

    println!();
    println!("{} {}", "Session:".dimmed(), response.session_id.dimmed());
}

/// Decodes each chart into `chart_N.png` under `dir`.
fn save_charts(dir: &Path, response: &SubmitResponse) -> Result<Vec<PathBuf>> {
    if response.visualizations.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut paths = Vec::with_capacity(response.visualizations.len());
    for (index, image) in response.visualizations.iter().enumerate() {
        let bytes = STANDARD
            .decode(image.data.as_bytes())
            .with_context(|| format!("Chart {} is not valid base64", index + 1))?;
        let path = dir.join(format!("chart_{}.png", index + 1));
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        paths.push(path);
    }
    Ok(paths)
}
