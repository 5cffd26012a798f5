use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Parser, Debug)]
#[command(
    name = "slack-archive",
    version,
    about = "Incremental Slack workspace archiver: download, merge, package"
)]
struct Cli {
    /// Emit the command report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download everything newer than the watermark and merge it into the archive.
    ///
    /// The watermark is midnight UTC of the newest archived day, so that day is
    /// fetched again on every run. Messages fetched twice keep both copies in
    /// the archive; they are not deduplicated.
    Run,
    /// Merge an existing snapshot tree into an archive tree.
    Merge {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        snapshot: PathBuf,
        /// Persist the newest archived day to last_run.txt afterwards.
        #[arg(long)]
        update_watermark: bool,
    },
    /// Show the newest archived day of a tree and its persisted watermark.
    Watermark { dir: PathBuf },
    /// Create a new token encryption key.
    GenerateKey {
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Encrypt an API token for the config file; reads stdin when omitted.
    EncryptToken { token: Option<String> },
    /// Show resolved paths, config and archive state.
    Status,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Run => commands::run::run()?,
        Command::Merge {
            archive,
            snapshot,
            update_watermark,
        } => commands::merge::run(&commands::merge::MergeOptions {
            archive,
            snapshot,
            update_watermark,
        })?,
        Command::Watermark { dir } => commands::watermark::run(&dir)?,
        Command::GenerateKey { key_file } => {
            commands::key::generate(&commands::key::GenerateKeyOptions { key_file })?
        }
        Command::EncryptToken { token } => {
            commands::key::encrypt(&commands::key::EncryptTokenOptions { token })?
        }
        Command::Status => commands::status::run()?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
