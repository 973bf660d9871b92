mod commands;
mod context;
mod examples;
mod output;
mod theme;

use anyhow::Result;
use clap::{ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand};
use colored::control::ShouldColorize;
use colored::{Color, Colorize};
use std::fmt::Write;

use commands::{
    migrate::{MigrateCommands, handle_migrate_commands},
    schema::{SchemaCommands, handle_schema_commands},
};
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME, help_styles};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("DATABASE_URL", "Database URL used when consentdb.toml does not set one"),
    ("RUST_LOG", "Log filter, e.g. consentdb=debug"),
];

#[derive(Parser)]
#[command(name = "consentdb")]
#[command(version)]
#[command(
    about = "Schema and migration tool for ConsentDB",
    long_about = r#"Schema and migration CLI for ConsentDB.

Reads entity overrides and extensions from consentdb.toml, compares the
assembled schema with a live database and writes additive SQL migrations.

Commands:
  schema    Inspect the assembled schema
  migrate   Plan, generate and deploy migrations
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Only print errors
    #[arg(short = 'q', long)]
    quiet: bool,

    #[arg(short = 'v', long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the schema assembled from configuration
    #[command(subcommand)]
    Schema(SchemaCommands),

    /// Plan, generate and deploy SQL migrations
    #[command(subcommand)]
    Migrate(MigrateCommands),
}

fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .styles(help_styles())
        .after_long_help(render_appendix(use_color))
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never });

    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand.clone().after_long_help(render_examples(example.groups, use_color));
        }
    }
    command
}

fn paint(text: &str, color: Color, bold: bool, use_color: bool) -> String {
    match (use_color, bold) {
        (false, _) => text.to_string(),
        (true, true) => text.color(color).bold().to_string(),
        (true, false) => text.color(color).to_string(),
    }
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", paint("Examples:", THEME.highlight, true, use_color));
    for (index, group) in groups.iter().enumerate() {
        let _ = writeln!(buffer, "  {}", paint(group.title, THEME.primary, true, use_color));
        for line in group.commands {
            let arrow = paint(ICONS.arrow, THEME.secondary, false, use_color);
            let _ = writeln!(buffer, "    {arrow} {}", paint(line, THEME.secondary, false, use_color));
        }
        if index + 1 < groups.len() {
            buffer.push('\n');
        }
    }
    buffer
}

fn render_appendix(use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", paint("Environment Variables:", THEME.highlight, true, use_color));
    for (key, description) in ENVIRONMENT_VARIABLES {
        let _ = writeln!(
            buffer,
            "  {}  {}",
            paint(key, THEME.key, true, use_color),
            paint(description, THEME.value, false, use_color)
        );
    }
    buffer.push('\n');
    let _ = writeln!(
        buffer,
        "{} {}",
        paint("Tip:", THEME.highlight, true, use_color),
        paint(
            "Use 'consentdb <command> --help' to view examples for each command.",
            THEME.secondary,
            false,
            use_color
        )
    );
    buffer
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = build_cli_command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());

    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    });

    if let Err(err) = execute(cli.command, &output).await {
        output.error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn execute(command: Commands, output: &OutputManager) -> Result<()> {
    match command {
        Commands::Schema(schema_cmd) => handle_schema_commands(schema_cmd, output),
        Commands::Migrate(migrate_cmd) => handle_migrate_commands(migrate_cmd, output).await,
    }
}
