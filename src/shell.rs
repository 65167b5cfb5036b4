//! Interactive query loop.

use std::io::{BufRead, Write};

use tracing::warn;

use crate::{
    embedding::Embedder,
    error::Result,
    index_store::Index,
    search::{self, SearchParams},
    summary::Summarizer,
};

/// Settings adjustable from inside the shell with `config`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellSettings {
    pub top_k: usize,
    pub threshold: f32,
    pub full_text: bool,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            top_k: 6,
            threshold: 0.3,
            full_text: true,
        }
    }
}

/// One line of shell input, interpreted.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellCommand<'a> {
    Quit,
    Config,
    Empty,
    Search(&'a str),
}

pub fn parse_command(line: &str) -> ShellCommand<'_> {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "" => ShellCommand::Empty,
        "quit" | "exit" | "q" => ShellCommand::Quit,
        "config" => ShellCommand::Config,
        _ => ShellCommand::Search(line),
    }
}

/// Update `settings` from a `config` dialogue. A blank answer keeps the
/// current value; an invalid answer is reported and ignored.
pub fn configure(
    settings: &mut ShellSettings,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "\nCurrent settings:")?;
    writeln!(out, "  top_k = {}", settings.top_k)?;
    writeln!(out, "  threshold = {}", settings.threshold)?;
    writeln!(out, "  show_full_text = {}", settings.full_text)?;

    let answer = prompt(
        input,
        out,
        &format!("\nNumber of results ({}): ", settings.top_k),
    )?;
    if let Some(answer) = answer.filter(|a| !a.is_empty()) {
        match answer.parse::<usize>() {
            Ok(k) if k > 0 => settings.top_k = k,
            _ => writeln!(out, "Invalid number of results: {answer}")?,
        }
    }

    let answer = prompt(
        input,
        out,
        &format!("Minimum similarity ({}): ", settings.threshold),
    )?;
    if let Some(answer) = answer.filter(|a| !a.is_empty()) {
        match answer.parse::<f32>() {
            Ok(t) if t.is_finite() => settings.threshold = t,
            _ => writeln!(out, "Invalid similarity threshold: {answer}")?,
        }
    }

    let current = if settings.full_text { 'y' } else { 'n' };
    let answer = prompt(
        input,
        out,
        &format!("Show full text? (y/n, currently {current}): "),
    )?;
    if let Some(answer) = answer.filter(|a| !a.is_empty()) {
        settings.full_text = answer.eq_ignore_ascii_case("y");
    }

    writeln!(out, "\nSettings updated!")?;
    Ok(())
}

/// Print `message`, then read one trimmed line. `None` at end of input.
fn prompt(
    input: &mut impl BufRead,
    out: &mut impl Write,
    message: &str,
) -> Result<Option<String>> {
    write!(out, "{message}")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn print_banner(out: &mut impl Write) -> Result<()> {
    writeln!(out, "\n{}", "=".repeat(10))?;
    writeln!(out, "Ask Away:")?;
    writeln!(out, "{}", "=".repeat(10))?;
    writeln!(out, "\nCommands:")?;
    writeln!(out, "  - Type your query and press Enter to search")?;
    writeln!(
        out,
        "  - Include 'ks[number]' or 'folder:<name>' to filter (e.g., 'ks9 aero summary')"
    )?;
    writeln!(out, "  - Type 'quit' or 'exit' to quit")?;
    writeln!(out, "  - Type 'config' to adjust settings")?;
    Ok(())
}

/// Run the interactive loop until `quit` or end of input.
///
/// Query failures (for example a query that embeds to a zero vector) are
/// reported and the loop continues.
pub fn run_shell(
    input: &mut impl BufRead,
    out: &mut impl Write,
    index: &Index,
    embedder: &mut dyn Embedder,
    summarizer: Option<&dyn Summarizer>,
) -> Result<ShellSettings> {
    let mut settings = ShellSettings::default();
    print_banner(out)?;

    loop {
        let Some(line) = prompt(input, out, "\nEnter search query: ")? else {
            writeln!(out)?;
            break;
        };

        let query = match parse_command(&line) {
            ShellCommand::Quit => {
                writeln!(out, "Goodbye!")?;
                break;
            }
            ShellCommand::Config => {
                configure(&mut settings, input, out)?;
                continue;
            }
            ShellCommand::Empty => continue,
            ShellCommand::Search(query) => query,
        };

        let params = SearchParams {
            query: query.to_string(),
            top_k: settings.top_k,
            threshold: settings.threshold,
        };
        let outcome = match search::execute_search(&params, index, embedder) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "search failed");
                writeln!(out, "Search failed: {e}")?;
                continue;
            }
        };
        search::write_human(out, &outcome.results, settings.full_text)?;

        if let Some(summarizer) = summarizer
            && !outcome.results.is_empty()
        {
            writeln!(out, "\nSummary:\n")?;
            let mut sink = |piece: &str| -> Result<()> {
                write!(out, "{piece}")?;
                out.flush()?;
                Ok(())
            };
            let streamed =
                summarizer.summarize(query, &outcome.results, &mut sink);
            writeln!(out)?;
            if let Err(e) = streamed {
                warn!(error = %e, "summary failed");
                writeln!(out, "Summary failed: {e}")?;
            }
        }
    }

    Ok(settings)
}
