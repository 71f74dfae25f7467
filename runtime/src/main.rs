//! Agent runtime CLI.
//!
//! Inspects the runtime's config, consent store and startup classification
//! from the command line. The agent loop itself embeds the library.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use agent_runtime::core::context_budget::{budget_for_context_window, estimate_tokens};
use agent_runtime::core::startup::{StartupError, StartupErrorCode, resolve_binary_path};
use agent_runtime::core::types::Message;
use agent_runtime::exit_codes;
use agent_runtime::io::config::{config_path, load_config, read_config};
use agent_runtime::io::consent_store::{ConsentStore, JsonConsentStore};
use agent_runtime::logging;
use agent_runtime::outbound::prepare_outbound;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "agent-runtime",
    version,
    about = "Tool consent, context budgeting and agent startup diagnostics"
)]
struct Cli {
    /// Config file (defaults to `.anyon/runtime.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report every config issue; exit 1 when any is an error.
    ValidateConfig,
    /// Print the agent binary that would be launched.
    ResolveBinary {
        /// Behave as a packaged build (no `PATH` fallback).
        #[arg(long)]
        packaged: bool,
    },
    /// Classify a `[CODE] message` startup error; exit 3 when retrying cannot help.
    Classify {
        error: String,
    },
    /// Truncate a JSON message history to fit a context window.
    Budget {
        /// Model context window in tokens.
        #[arg(long)]
        window: usize,
        /// Override `context_window_ratio`.
        #[arg(long)]
        ratio: Option<f64>,
        file: PathBuf,
    },
    /// Manage stored accept-always decisions.
    Consents {
        /// Consent store file (defaults to `.anyon/state/tool_consents.json`).
        #[arg(long)]
        store: Option<PathBuf>,

        #[command(subcommand)]
        command: ConsentsCommand,
    },
}

#[derive(Subcommand)]
enum ConsentsCommand {
    List,
    Revoke { tool: String },
}

#[derive(Serialize)]
struct Classification<'a> {
    code: Option<StartupErrorCode>,
    message: Option<&'a str>,
    retryable: bool,
}

#[derive(Serialize)]
struct BudgetReport<'a> {
    budget: usize,
    tokens_before: usize,
    tokens_after: usize,
    truncated: bool,
    messages: &'a [Message],
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    let cfg_path = config_path(&root, cli.config.as_deref());
    match cli.command {
        Command::ValidateConfig => cmd_validate_config(&cfg_path),
        Command::ResolveBinary { packaged } => cmd_resolve_binary(&cfg_path, packaged),
        Command::Classify { error } => Ok(cmd_classify(&error)),
        Command::Budget {
            window,
            ratio,
            file,
        } => cmd_budget(&cfg_path, window, ratio, &file),
        Command::Consents { store, command } => {
            let store = match store {
                Some(path) => JsonConsentStore::new(path),
                None => JsonConsentStore::at_root(&root),
            };
            cmd_consents(&store, command)
        }
    }
}

fn cmd_validate_config(path: &Path) -> Result<i32> {
    let cfg = read_config(path)?;
    let report = cfg.validate();
    if report.is_empty() {
        println!("ok: {}", path.display());
        return Ok(exit_codes::OK);
    }
    println!("{}", report.format());
    if report.has_errors() {
        return Ok(exit_codes::INVALID);
    }
    Ok(exit_codes::OK)
}

fn cmd_resolve_binary(cfg_path: &Path, packaged: bool) -> Result<i32> {
    let cfg = load_config(cfg_path)?;
    let mut inputs = cfg.binary_inputs().with_env();
    inputs.is_packaged |= packaged;
    match resolve_binary_path(&inputs) {
        Ok(binary) => {
            println!("{}", serde_json::to_string(&binary)?);
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(exit_codes::FATAL_STARTUP)
        }
    }
}

fn cmd_classify(raw: &str) -> i32 {
    let parsed = StartupError::parse(raw);
    let out = Classification {
        code: parsed.as_ref().map(|err| err.code),
        message: parsed.as_ref().map(|err| err.message.as_str()),
        retryable: parsed.as_ref().is_none_or(StartupError::is_retryable),
    };
    match serde_json::to_string(&out) {
        Ok(line) => println!("{line}"),
        Err(err) => {
            eprintln!("{err}");
            return exit_codes::INVALID;
        }
    }
    if out.retryable {
        exit_codes::OK
    } else {
        exit_codes::FATAL_STARTUP
    }
}

fn cmd_budget(cfg_path: &Path, window: usize, ratio: Option<f64>, file: &Path) -> Result<i32> {
    let mut cfg = load_config(cfg_path)?;
    if let Some(ratio) = ratio {
        if !(ratio > 0.0 && ratio <= 1.0) {
            bail!("--ratio must be within (0, 1], got {ratio}");
        }
        cfg.context_window_ratio = ratio;
    }
    let raw = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let messages: Vec<Message> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", file.display()))?;

    let out = prepare_outbound(&messages, window, &cfg);
    let report = BudgetReport {
        budget: budget_for_context_window(window, cfg.context_window_ratio),
        tokens_before: estimate_tokens(&messages),
        tokens_after: estimate_tokens(&out),
        truncated: matches!(out, Cow::Owned(_)),
        messages: &out,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_codes::OK)
}

fn cmd_consents(store: &JsonConsentStore, command: ConsentsCommand) -> Result<i32> {
    match command {
        ConsentsCommand::List => {
            for record in store.list()? {
                println!("{}\t{}", record.tool_name, record.consent.as_str());
            }
            Ok(exit_codes::OK)
        }
        ConsentsCommand::Revoke { tool } => {
            if store.remove(&tool)? {
                println!("revoked {tool}");
                Ok(exit_codes::OK)
            } else {
                eprintln!("no stored consent for {tool}");
                Ok(exit_codes::INVALID)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_budget() {
        let cli = Cli::parse_from([
            "agent-runtime",
            "budget",
            "--window",
            "8000",
            "history.json",
        ]);
        assert!(matches!(
            cli.command,
            Command::Budget {
                window: 8000,
                ratio: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_consents_revoke_with_store() {
        let cli = Cli::parse_from([
            "agent-runtime",
            "consents",
            "--store",
            "c.json",
            "revoke",
            "run_shell",
        ]);
        let Command::Consents { store, command } = cli.command else {
            panic!("expected consents");
        };
        assert_eq!(store, Some(PathBuf::from("c.json")));
        assert!(matches!(command, ConsentsCommand::Revoke { tool } if tool == "run_shell"));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["agent-runtime", "validate-config", "--config", "x.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn classify_exit_codes() {
        assert_eq!(
            cmd_classify("[OPENCODE_SPAWN_ENOENT] not found"),
            exit_codes::FATAL_STARTUP
        );
        assert_eq!(
            cmd_classify("[OPENCODE_PROCESS_TERMINATED] exited: code=1"),
            exit_codes::OK
        );
        assert_eq!(cmd_classify("something else"), exit_codes::OK);
    }
}
