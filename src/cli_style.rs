use clap::builder::styling::{AnsiColor, Style};
use clap::builder::Styles;
use crossterm::style::{Color, Stylize};
use unicode_width::UnicodeWidthStr;

const ACCENT: Color = Color::Rgb { r: 0, g: 200, b: 220 };
const OK: Color = Color::Rgb { r: 90, g: 220, b: 120 };
const WARN: Color = Color::Rgb { r: 250, g: 180, b: 40 };
const FAIL: Color = Color::Rgb { r: 240, g: 80, b: 80 };
const MUTED: Color = Color::Rgb { r: 140, g: 140, b: 140 };

const RULE: char = '─';
const HEADER_WIDTH: usize = 48;

pub fn get_styles() -> Styles {
    let heading = Style::new().bold().fg_color(Some(AnsiColor::Cyan.into()));
    let failure = Style::new().bold().fg_color(Some(AnsiColor::Red.into()));
    Styles::styled()
        .usage(heading)
        .header(heading)
        .literal(Style::new().bold().fg_color(Some(AnsiColor::Green.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::BrightBlack.into())))
        .invalid(failure)
        .error(failure)
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".with(OK).bold(), message);
}

/// Goes to stderr so piped output stays clean.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".with(FAIL).bold(), message.with(FAIL));
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".with(WARN).bold(), message.with(WARN));
}

/// `── title ─────` padded to a fixed width.
pub fn print_section_header(title: &str) {
    let tail = HEADER_WIDTH.saturating_sub(title.width() + 4).max(2);
    let rule = |n: usize| RULE.to_string().repeat(n).with(ACCENT);
    println!("{} {} {}", rule(2), title.with(ACCENT).bold(), rule(tail));
}

pub fn print_key_value(key: &str, value: &str) {
    println!("  {} {}", format!("{:<14}", format!("{}:", key)).with(MUTED), value);
}

/// Left-aligned columns sized to their widest cell, in terminal cells.
pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    pub fn new(headers: Vec<&str>) -> Self {
        Self {
            headers: headers.into_iter().map(str::to_string).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        (0..self.headers.len())
            .map(|col| {
                std::iter::once(&self.headers)
                    .chain(&self.rows)
                    .filter_map(|row| row.get(col))
                    .map(|cell| cell.width())
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn print(&self) {
        let widths = self.widths();
        let line = |row: &[String]| {
            row.iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{}{}", cell, " ".repeat(w.saturating_sub(cell.width()))))
                .collect::<Vec<_>>()
                .join("  ")
        };

        println!("{}", line(&self.headers).with(ACCENT).bold());
        let total = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        println!("{}", RULE.to_string().repeat(total).with(MUTED));
        for row in &self.rows {
            println!("{}", line(row));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_widths_follow_widest_cell() {
        let mut table = TableBuilder::new(vec!["#", "Entry"]);
        table.add_row(vec!["12".to_string(), "Billy Joel - Piano Man.mp3".to_string()]);
        table.add_row(vec!["3".to_string(), "日本語.flac".to_string()]);
        assert_eq!(table.widths(), vec![2, 26]);
    }
}
