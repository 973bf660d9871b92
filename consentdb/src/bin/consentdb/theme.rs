use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Style};
use colored::Color;
use once_cell::sync::Lazy;

/// CLI color theme
pub struct ColorTheme {
    pub success: Color,
    pub error: Color,
    pub warning: Color,
    pub info: Color,
    pub highlight: Color,
    pub muted: Color,
    pub primary: Color,
    pub secondary: Color,
    pub key: Color,
    pub value: Color,
}

impl Default for ColorTheme {
    fn default() -> Self {
        Self {
            success: Color::Green,
            error: Color::Red,
            warning: Color::Yellow,
            info: Color::Blue,
            highlight: Color::Cyan,
            muted: Color::BrightBlack,
            primary: Color::BrightBlue,
            secondary: Color::Magenta,
            key: Color::BrightCyan,
            value: Color::White,
        }
    }
}

pub static THEME: Lazy<ColorTheme> = Lazy::new(ColorTheme::default);

pub struct Icons {
    pub success: &'static str,
    pub error: &'static str,
    pub warning: &'static str,
    pub info: &'static str,
    pub arrow: &'static str,
    pub bullet: &'static str,
    pub loading: &'static str,
    pub plus: &'static str,
}

pub const ICONS: Icons = Icons {
    success: "✓",
    error: "✗",
    warning: "⚠",
    info: "ℹ",
    arrow: "→",
    bullet: "•",
    loading: "⟳",
    plus: "+",
};

/// Help-output styles matching [`THEME`].
pub fn help_styles() -> Styles {
    let fg = |color: AnsiColor| Style::new().fg_color(Some(color.into()));
    Styles::styled()
        .usage(fg(AnsiColor::BrightBlue).bold())
        .header(fg(AnsiColor::Cyan).bold())
        .literal(fg(AnsiColor::Magenta))
        .placeholder(fg(AnsiColor::BrightBlack))
        .valid(fg(AnsiColor::Green))
        .invalid(fg(AnsiColor::Yellow))
        .error(fg(AnsiColor::Red).bold())
}
