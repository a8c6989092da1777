mod bash_parser;
mod config;
mod directory;
mod error;
mod executor;
mod history;
mod i18n;
mod llm;
mod safety;
mod session;
mod translator;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{ErrorKind, ExecError, SessionError};
use executor::ExecutionResult;
use i18n::I18n;
use session::{Outcome, Session};

#[derive(Parser)]
#[command(name = "smartshell", version)]
#[command(about = "Describe a task in plain language and run it as a shell command")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Command timeout in seconds (overrides exec.timeout_secs)
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Model name (overrides backend.model)
    #[arg(long, global = true)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session (default)
    Repl,
    /// Translate one request and run it; exits with the command's exit code
    Run {
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
        /// Only print the command
        #[arg(long)]
        dry_run: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the command a request translates to
    Translate {
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so they never mix with command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smartshell=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new()?;
    let i18n = I18n::new(&config.get_effective_language());

    let mut session_config = config.session_config().with_context(|| {
        i18n.t_format(
            "config_hint",
            &[&Config::get_config_path().display().to_string()],
        )
    })?;
    if let Some(secs) = cli.timeout {
        session_config.timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(model) = cli.model {
        session_config.model = model;
    }

    let start = std::env::current_dir().context("reading current directory")?;
    let session = Session::new(session_config, &start)?;

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Repl => {
            repl(&session, &i18n).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            request,
            dry_run,
            json,
        } => Ok(run_once(&session, &i18n, &request.join(" "), dry_run, json).await),
        Commands::Translate { request } => match session.translate(&request.join(" ")).await {
            Ok(command) => {
                println!("{command}");
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                report_error(&i18n, &err);
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

async fn repl(session: &Session, i18n: &I18n) -> Result<()> {
    let hint = i18n.t("interrupt_hint");
    ctrlc::set_handler(move || eprintln!("\n{}", hint.dimmed()))
        .context("installing Ctrl-C handler")?;

    println!(
        "{}",
        i18n.t_format(
            "welcome",
            &[env!("CARGO_PKG_VERSION"), &session.os_family().to_string()]
        )
        .bold()
    );

    let home = dirs::home_dir();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tracing::debug!(state = ?session.state(), "waiting for input");
        let prompt = format!("{}$ ", display_dir(&session.current_directory(), home.as_deref()));
        print!("{}", prompt.green().bold());
        io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            // Ctrl-D
            println!();
            break;
        };
        let text = line.trim();
        match text {
            "" => continue,
            "exit" | "quit" => break,
            "history" => {
                print_history(session, i18n);
                continue;
            }
            _ => {}
        }

        let command = match session.translate(text).await {
            Ok(command) => command,
            Err(err) => {
                report_error(i18n, &err);
                continue;
            }
        };
        println!("{}", i18n.t_format("executing", &[&command]).cyan());

        match session.execute(&command).await {
            Ok(outcome) => render_outcome(i18n, &outcome, home.as_deref()),
            Err(err) => report_error(i18n, &err),
        }
    }

    println!("{}", i18n.t("goodbye"));
    Ok(())
}

async fn run_once(session: &Session, i18n: &I18n, request: &str, dry_run: bool, json: bool) -> ExitCode {
    if dry_run {
        return match session.translate(request).await {
            Ok(command) => {
                println!("{}", i18n.t_format("translated", &[&command]));
                ExitCode::SUCCESS
            }
            Err(err) => {
                report_error(i18n, &err);
                ExitCode::FAILURE
            }
        };
    }

    let submission = match session.submit(request).await {
        Ok(submission) => submission,
        Err(err) => {
            report_error(i18n, &err);
            return ExitCode::FAILURE;
        }
    };

    if json {
        let report = JsonReport::new(&submission.command, &submission.outcome);
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("{}", err.to_string().red()),
        }
    } else {
        eprintln!("{}", i18n.t_format("executing", &[&submission.command]).cyan());
        render_outcome(i18n, &submission.outcome, dirs::home_dir().as_deref());
    }

    let code = submission.outcome.execution().map_or(0, |r| r.exit_code);
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn render_outcome(i18n: &I18n, outcome: &Outcome, home: Option<&Path>) {
    match outcome {
        Outcome::DirectoryChanged { to, .. } => {
            println!(
                "{}",
                i18n.t_format("directory_changed", &[&display_dir(to, home)]).dimmed()
            );
        }
        Outcome::Completed(result) => {
            print_lines(&result.stdout, &result.stderr);
            if !result.success() {
                println!(
                    "{}",
                    i18n.t_format(
                        "command_failed",
                        &[
                            &result.exit_code.to_string(),
                            &result.duration.as_millis().to_string()
                        ]
                    )
                    .red()
                );
            }
        }
    }
}

fn print_lines(stdout: &[String], stderr: &[String]) {
    for line in stdout {
        println!("{line}");
    }
    for line in stderr {
        eprintln!("{}", line.red());
    }
}

fn report_error(i18n: &I18n, err: &SessionError) {
    let message = err.to_string();
    match err.kind() {
        ErrorKind::Translation => {
            eprintln!("{}", i18n.t_format("translate_failed", &[&message]).yellow())
        }
        ErrorKind::Execution => {
            eprintln!("{}", i18n.t_format("execute_failed", &[&message]).red().bold())
        }
        ErrorKind::Busy => eprintln!("{}", i18n.t("busy").dimmed()),
    }

    if err.is_retryable() {
        eprintln!("{}", i18n.t("retry_hint").dimmed());
    }
    if let SessionError::Exec(ExecError::Timeout { stdout, stderr, .. }) = err {
        if !stdout.is_empty() || !stderr.is_empty() {
            eprintln!("{}", i18n.t("partial_output").dimmed());
            print_lines(stdout, stderr);
        }
    }
}

fn print_history(session: &Session, i18n: &I18n) {
    let entries = session.history();
    if entries.is_empty() {
        println!("{}", i18n.t("history_empty").dimmed());
        return;
    }
    for entry in entries {
        let when = entry
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S")
            .to_string();
        println!(
            "{}",
            i18n.t_format("history_entry", &[&when, &entry.request, &entry.command])
        );
    }
}

/// Shows paths under the home directory as `~/...`.
fn display_dir(dir: &Path, home: Option<&Path>) -> String {
    if let Some(home) = home {
        if let Some(relative) = pathdiff::diff_paths(dir, home) {
            if relative.as_os_str().is_empty() {
                return "~".to_string();
            }
            if !relative.starts_with("..") {
                return format!("~/{}", relative.display());
            }
        }
    }
    dir.display().to_string()
}

#[derive(Serialize)]
struct JsonReport<'a> {
    command: &'a str,
    working_directory: PathBuf,
    exit_code: i32,
    stdout: &'a [String],
    stderr: &'a [String],
    duration_ms: u64,
    started_at: Option<DateTime<Utc>>,
}

impl<'a> JsonReport<'a> {
    fn new(command: &'a str, outcome: &'a Outcome) -> Self {
        match outcome {
            Outcome::DirectoryChanged { to, .. } => Self {
                command,
                working_directory: to.clone(),
                exit_code: 0,
                stdout: &[],
                stderr: &[],
                duration_ms: 0,
                started_at: None,
            },
            Outcome::Completed(result) => Self::from_result(command, result),
        }
    }

    fn from_result(command: &'a str, result: &'a ExecutionResult) -> Self {
        Self {
            command,
            working_directory: result.working_directory.clone(),
            exit_code: result.exit_code,
            stdout: &result.stdout,
            stderr: &result.stderr,
            duration_ms: result.duration.as_millis() as u64,
            started_at: Some(result.started_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_is_abbreviated_in_prompt() {
        let home = Path::new("/home/u");
        assert_eq!(display_dir(Path::new("/home/u"), Some(home)), "~");
        assert_eq!(display_dir(Path::new("/home/u/src/app"), Some(home)), "~/src/app");
        assert_eq!(display_dir(Path::new("/tmp"), Some(home)), "/tmp");
        assert_eq!(display_dir(Path::new("/home/other"), Some(home)), "/home/other");
        assert_eq!(display_dir(Path::new("/tmp"), None), "/tmp");
    }

    #[test]
    fn json_report_for_directory_change() {
        let outcome = Outcome::DirectoryChanged {
            from: PathBuf::from("/home/u/project"),
            to: PathBuf::from("/home/u"),
        };
        let value = serde_json::to_value(JsonReport::new("cd ..", &outcome)).unwrap();
        assert_eq!(value["command"], "cd ..");
        assert_eq!(value["working_directory"], "/home/u");
        assert_eq!(value["exit_code"], 0);
        assert!(value["started_at"].is_null());
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from(["smartshell", "--timeout", "5", "run", "--dry-run", "list", "files"])
            .unwrap();
        assert_eq!(cli.timeout, Some(5));
        match cli.command {
            Some(Commands::Run {
                request, dry_run, json,
            }) => {
                assert_eq!(request, vec!["list", "files"]);
                assert!(dry_run);
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["smartshell"]).unwrap().command.is_none());
    }
}
