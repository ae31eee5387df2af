use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::notify::{Notice, NoticeLevel};
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        let color = cfg.get_bool("color").unwrap_or(true) && io::stdout().is_terminal();
        Self { color }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, tasks), fields(count = tasks.len()))]
    pub fn write_task_table<W: Write>(&self, out: &mut W, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Title".to_string(),
            "Description".to_string(),
            "Author".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                let done = if task.completed { "[x]" } else { "[ ]" };
                let title = if task.completed {
                    self.paint(&task.title, "9")
                } else {
                    task.title.clone()
                };
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    done.to_string(),
                    title,
                    task.description.clone(),
                    task.author.clone(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_notice<W: Write>(&self, out: &mut W, notice: &Notice) -> anyhow::Result<()> {
        let (tag, code) = match notice.level {
            NoticeLevel::Success => ("ok", "32"),
            NoticeLevel::Info => ("info", "36"),
            NoticeLevel::Error => ("error", "31"),
        };
        writeln!(out, "{} {}", self.paint(&format!("[{tag}]"), code), notice.message)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
