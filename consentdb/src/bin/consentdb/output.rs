use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;
use std::io::Write;

use crate::theme::{ICONS, THEME};

#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted tables (default)
    #[default]
    Table,
    /// JSON for scripting
    Json,
    /// One line per item
    Compact,
}

#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Data that can be rendered in every [`OutputFormat`].
pub trait TableDisplay {
    fn to_table(&self, output: &OutputManager) -> Table;
    fn to_compact(&self) -> String;
}

pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        if options.no_color {
            colored::control::set_override(false);
        }
        Self { options }
    }

    pub fn is_json(&self) -> bool {
        self.options.output_format == OutputFormat::Json
    }

    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }
        match self.options.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
            OutputFormat::Table => println!("{}", data.to_table(self)),
            OutputFormat::Compact => println!("{}", data.to_compact()),
        }
        Ok(())
    }

    fn line(&self, icon: &str, color: colored::Color, message: &str) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    pub fn success(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.line(ICONS.success, THEME.success, message));
        }
    }

    /// Errors are printed even in quiet mode.
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.line(ICONS.error, THEME.error, message));
    }

    pub fn warning(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.line(ICONS.warning, THEME.warning, message));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.line(ICONS.info, THEME.info, message));
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            eprintln!("{}", self.line(ICONS.arrow, THEME.muted, message));
        }
    }

    pub fn heading(&self, text: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }
        if self.options.no_color {
            println!("\n{text}\n{}", "=".repeat(text.len()));
        } else {
            println!("\n{}", text.color(THEME.primary).bold());
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }
        if self.options.no_color {
            println!("{key}: {value}");
        } else {
            println!("{}: {}", key.color(THEME.key).bold(), value.color(THEME.value));
        }
    }

    pub fn bullet(&self, text: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }
        let icon = if self.options.no_color {
            ICONS.bullet.normal()
        } else {
            ICONS.bullet.color(THEME.muted)
        };
        println!("  {icon} {text}");
    }

    /// Prints a block of SQL, indented and dimmed.
    pub fn sql(&self, sql: &str) {
        if self.options.quiet {
            return;
        }
        for line in sql.lines() {
            if self.options.no_color {
                println!("    {line}");
            } else {
                println!("    {}", line.color(THEME.secondary));
            }
        }
    }

    pub fn create_table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        if self.options.no_color {
            table.load_preset(comfy_table::presets::ASCII_FULL);
        } else {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
        }
        let header = headers.iter().map(|title| {
            let cell = Cell::new(title).add_attribute(Attribute::Bold);
            if self.options.no_color { cell } else { cell.fg(TableColor::Cyan) }
        });
        table.set_header(header.collect::<Vec<_>>());
        table
    }

    pub fn progress(&self, message: &str) {
        if self.options.quiet || self.is_json() {
            return;
        }
        let output = if self.options.no_color {
            format!("{} {message}...", ICONS.loading)
        } else {
            format!(
                "{} {}...",
                ICONS.loading.color(THEME.highlight).bold(),
                message.color(THEME.highlight)
            )
        };
        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    pub fn clear_line(&self) {
        if self.options.quiet || self.is_json() {
            return;
        }
        print!("\r{}\r", " ".repeat(80));
        std::io::stdout().flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Pair {
        name: String,
        value: i32,
    }

    impl TableDisplay for Pair {
        fn to_table(&self, output: &OutputManager) -> Table {
            let mut table = output.create_table(&["Name", "Value"]);
            table.add_row(vec![Cell::new(&self.name), Cell::new(self.value)]);
            table
        }

        fn to_compact(&self) -> String {
            format!("{}={}", self.name, self.value)
        }
    }

    #[test]
    fn every_format_renders() {
        let pair = Pair {
            name: "orders".into(),
            value: 3,
        };
        for output_format in [OutputFormat::Table, OutputFormat::Json, OutputFormat::Compact] {
            let manager = OutputManager::new(GlobalOptions {
                output_format,
                no_color: true,
                ..GlobalOptions::default()
            });
            assert!(manager.display(&pair).is_ok());
        }
    }

    #[test]
    fn tables_carry_headers() {
        let manager = OutputManager::new(GlobalOptions {
            no_color: true,
            ..GlobalOptions::default()
        });
        let rendered = manager.create_table(&["Entity", "Table"]).to_string();
        assert!(rendered.contains("Entity"));
        assert!(rendered.contains("Table"));
    }
}
