// Entry point and high-level CLI flow.
//
// - `generate` turns the four weekly dashboard exports into one report deck
//   with a slide per client.
// - `monthly` builds the campaign cost and point usage workbooks.
// - `validate` checks a generated deck's brand table against the template.
// Every run gets its own task directory; see `task.rs`.
mod aggregate;
mod chart;
mod classifier;
mod config;
mod error;
#[cfg(test)]
mod fixtures;
mod loader;
mod logging;
mod merge;
mod monthly;
mod normalize;
mod output;
mod package;
mod pipeline;
mod populate;
mod task;
mod types;
mod util;
mod validate;
mod xml;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use config::ReportConfig;
use monthly::MonthlyOptions;
use pipeline::GenerateOptions;
use validate::ValidateOptions;

#[derive(Parser, Debug)]
#[command(name = "report-builder", version, about = "Builds monthly client report decks and workbooks")]
struct Cli {
    /// TOML configuration; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `tasks_dir` from the configuration
    #[arg(long, global = true)]
    tasks_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the per-client report deck
    Generate {
        /// Target month, YYYYMM
        #[arg(value_parser = parse_period)]
        period: String,

        /// Input CSV files
        files: Vec<PathBuf>,

        /// Directory scanned for input CSVs (default `input` when no files are given)
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Presentation template, overrides `report.template`
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Build the campaign cost and point usage workbooks
    Monthly {
        /// Target month, YYYYMM
        #[arg(value_parser = parse_period)]
        period: String,

        /// Directory scanned for CSV/XLSX inputs (default `input`)
        #[arg(long)]
        input_dir: Option<PathBuf>,

        #[arg(long)]
        campaign: Option<PathBuf>,

        #[arg(long)]
        discount: Option<PathBuf>,

        #[arg(long)]
        point: Option<PathBuf>,
    },
    /// Compare a generated deck's brand table with the template; exits 1 on errors
    Validate {
        /// Generated deck
        deck: PathBuf,

        /// Presentation template, overrides `report.template`
        #[arg(long)]
        template: Option<PathBuf>,
    },
}

fn parse_period(s: &str) -> Result<String, String> {
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("`{}` is not YYYYMM", s));
    }
    match s[4..].parse::<u32>() {
        Ok(1..=12) => Ok(s.to_string()),
        _ => Err(format!("`{}` has no month {}", s, &s[4..])),
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = ReportConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.tasks_dir {
        config.tasks_dir = dir;
    }
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Command::Generate {
            period,
            files,
            input_dir,
            template,
        } => {
            let input_dir = match input_dir {
                None if files.is_empty() => Some(PathBuf::from("input")),
                other => other,
            };
            let opts = GenerateOptions {
                period,
                files,
                input_dir,
                template,
            };
            let summary = pipeline::run_generate(&config, &opts, today)?;
            output::preview_table_rows("Client results", &summary.clients, summary.clients.len());
            if let Some(path) = &summary.output {
                println!("Deck: {} ({} slides)", path, summary.slides);
            }
            if !summary.skipped.is_empty() {
                println!("Skipped: {}", summary.skipped.join(", "));
            }
        }
        Command::Monthly {
            period,
            input_dir,
            campaign,
            discount,
            point,
        } => {
            let opts = MonthlyOptions {
                period,
                input_dir: Some(input_dir.unwrap_or_else(|| PathBuf::from("input"))),
                campaign,
                discount,
                point,
            };
            let summary = monthly::run_monthly(&config, &opts, today)?;
            for path in &summary.outputs {
                println!("Written: {}", path);
            }
            for report in &summary.skipped {
                println!("Skipped: {} report", report);
            }
        }
        Command::Validate { deck, template } => {
            let opts = ValidateOptions { deck, template };
            let issues = validate::run_validate(&config, &opts)?;
            if issues.is_empty() {
                println!("OK: deck matches the template layout");
                return Ok(ExitCode::SUCCESS);
            }
            output::preview_table_rows("Layout issues", &issues, issues.len());
            if validate::error_count(&issues) > 0 {
                return Ok(ExitCode::from(1));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    logging::init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_must_be_a_real_month() {
        assert_eq!(parse_period("202601").unwrap(), "202601");
        assert_eq!(parse_period("202612").unwrap(), "202612");
        assert!(parse_period("202613").is_err());
        assert!(parse_period("202600").is_err());
        assert!(parse_period("2026-1").is_err());
        assert!(parse_period("20261").is_err());
    }

    #[test]
    fn generate_takes_files_and_global_flags() {
        let cli = Cli::try_parse_from([
            "report-builder",
            "generate",
            "202601",
            "a.csv",
            "b.csv",
            "--tasks-dir",
            "out",
        ])
        .unwrap();
        assert_eq!(cli.tasks_dir, Some(PathBuf::from("out")));
        match cli.command {
            Command::Generate { period, files, .. } => {
                assert_eq!(period, "202601");
                assert_eq!(files.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validate_takes_deck_and_template() {
        let cli = Cli::try_parse_from(["report-builder", "validate", "deck.pptx", "--template", "t.pptx"]).unwrap();
        match cli.command {
            Command::Validate { deck, template } => {
                assert_eq!(deck, PathBuf::from("deck.pptx"));
                assert_eq!(template, Some(PathBuf::from("t.pptx")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_period_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["report-builder", "monthly", "202613"]).is_err());
    }
}
