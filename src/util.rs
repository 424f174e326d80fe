use std::env;
use std::path::Path;
use std::process::Command as ProcessCommand;

use chrono::{Local, NaiveDate};

use crate::{BotError, Result};

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env_optional(name) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| BotError::Config(format!("Invalid {name}"))),
        None => Ok(default),
    }
}

pub(crate) fn env_usize(name: &str, default: usize) -> Result<usize> {
    match env_optional(name) {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_| BotError::Config(format!("Invalid {name}"))),
        None => Ok(default),
    }
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub(crate) fn bool_flag(value: bool) -> String {
    if value { "1".to_string() } else { "0".to_string() }
}

pub(crate) fn split_text_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for ch in text.chars() {
        if count >= max_chars {
            chunks.push(current);
            current = String::new();
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

/// Plain-text table with left-aligned columns separated by two spaces.
///
/// With headers, a dashed rule sits under the header row. Without headers the
/// body is framed by dashed rules above and below, so it still reads as a
/// table inside a Slack code block.
pub(crate) fn format_table(headers: Option<&[&str]>, rows: &[Vec<String>]) -> String {
    let columns = rows
        .iter()
        .map(Vec::len)
        .chain(headers.map(<[&str]>::len))
        .max()
        .unwrap_or(0);
    if columns == 0 {
        return String::new();
    }

    let mut widths = vec![0usize; columns];
    if let Some(headers) = headers {
        for (i, h) in headers.iter().enumerate() {
            widths[i] = widths[i].max(h.chars().count());
        }
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let render_row = |cells: Vec<&str>| -> String {
        let mut line = String::new();
        for (i, width) in widths.iter().enumerate() {
            let cell = cells.get(i).copied().unwrap_or("");
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(cell);
            if i + 1 < columns {
                let pad = width.saturating_sub(cell.chars().count());
                line.push_str(&" ".repeat(pad));
            }
        }
        line.trim_end().to_string()
    };
    let rule = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("  ");

    let mut lines = Vec::new();
    match headers {
        Some(headers) => {
            lines.push(render_row(headers.to_vec()));
            lines.push(rule);
            for row in rows {
                lines.push(render_row(row.iter().map(String::as_str).collect()));
            }
        }
        None => {
            lines.push(rule.clone());
            for row in rows {
                lines.push(render_row(row.iter().map(String::as_str).collect()));
            }
            lines.push(rule);
        }
    }
    lines.join("\n")
}

pub(crate) fn build_external_command(program: &str, args: &[String]) -> ProcessCommand {
    let mut cmd = ProcessCommand::new(program);
    cmd.args(args);

    // Own process group: a terminal Ctrl-C aimed at the bot skips the child.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
