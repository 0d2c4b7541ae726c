//! Fixed-width table rendering for the channel summary.
//!
//! Cells are escaped on the way in (`\|`, `\\`, `\n`, `\r`) so that a
//! rendered row always stays on one line and `parse_line` gets back the
//! cells that went in.

use crate::channels::split_message;

const FENCE: &str = "```";

/// Width of each column: the widest of header and cells, in chars.
pub fn column_widths(headers: &[String], rows: &[Vec<String>]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect()
}

/// Render `| a | b |` lines: header, dash separator, one line per row.
/// Rows shorter than the header are padded with empty cells; extra cells are
/// dropped.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let headers = escape_row(headers);
    let rows: Vec<Vec<String>> = rows.iter().map(|row| escape_row(row)).collect();
    let widths = column_widths(&headers, &rows);
    let mut lines = Vec::with_capacity(rows.len() + 2);

    lines.push(render_line(&headers, &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    lines.push(render_line(&separator, &widths));
    for row in &rows {
        lines.push(render_line(row, &widths));
    }
    lines.join("\n")
}

fn escape_row(cells: &[String]) -> Vec<String> {
    cells.iter().map(|cell| escape_cell(cell)).collect()
}

fn escape_cell(cell: &str) -> String {
    let mut out = String::with_capacity(cell.len());
    for c in cell.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn render_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = widths
        .iter()
        .enumerate()
        .map(|(col, width)| {
            let cell = cells.get(col).map(String::as_str).unwrap_or("");
            let fill = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(fill))
        })
        .collect();
    format!("| {} |", padded.join(" | "))
}

/// Parse a rendered line back into trimmed, unescaped cells.
pub fn parse_line(line: &str) -> Vec<String> {
    let inner = line
        .trim()
        .strip_prefix('|')
        .and_then(|l| l.strip_suffix('|'))
        .unwrap_or(line);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some(other) => current.push(other),
                None => current.push('\\'),
            },
            '|' => cells.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    cells.push(current);
    cells.into_iter().map(|c| c.trim().to_string()).collect()
}

/// Wrap a rendered table in code fences, splitting on line boundaries so
/// every block fits in `max_len` chars. A single over-long line is cut.
pub fn code_blocks(table: &str, max_len: usize) -> Vec<String> {
    let overhead = FENCE.len() * 2 + 2;
    let budget = max_len.saturating_sub(overhead).max(1);

    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut flush = |body: &mut String| {
        if !body.is_empty() {
            blocks.push(format!("{FENCE}\n{body}\n{FENCE}"));
            body.clear();
        }
    };

    for line in table.lines() {
        let pieces = if line.chars().count() > budget {
            split_message(line, budget)
        } else {
            vec![line.to_string()]
        };
        for piece in pieces {
            let extra = piece.chars().count() + usize::from(!current.is_empty());
            if current.chars().count() + extra > budget {
                flush(&mut current);
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&piece);
        }
    }
    flush(&mut current);
    blocks
}
