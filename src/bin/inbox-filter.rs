#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for running inbox filter rules against IMAP accounts

use anyhow::Context;
use clap::{Parser, Subcommand};
use inbox_filter::{
    Account, AccountReport, AccountStore, CancellationToken, Engine,
    EngineConfig, EnvCredentials, FilterRule, ImapProvider, JsonStore,
    MatchPolicy, RuleStore, RunReport, Scope, legacy,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inbox-filter")]
#[command(about = "Apply move/delete filter rules to IMAP inboxes")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Accounts and rules file (falls back to INBOX_FILTER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the filters now
    Run {
        /// Only these accounts (repeatable)
        #[arg(long = "account")]
        accounts: Vec<String>,

        /// Report matches without moving or deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Skip messages an earlier rule already acted on
        #[arg(long)]
        first_match_wins: bool,
    },

    /// List configured accounts
    Accounts,

    /// List rules, optionally the full ordered set for one account
    Rules {
        #[arg(long)]
        account: Option<String>,
    },

    /// Import old triplet-style rules into the config file
    ImportLegacy {
        /// JSON array of "contain:..", "move_to:..", "filter:.." rows
        file: PathBuf,

        /// Bind the imported rules to this account instead of all
        #[arg(long)]
        account: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| {
            anyhow::anyhow!("Failed to install rustls crypto provider")
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env()?;
    let path = args
        .config
        .clone()
        .or_else(|| {
            std::env::var_os("INBOX_FILTER_CONFIG").map(PathBuf::from)
        })
        .context("No config file: pass --config or set INBOX_FILTER_CONFIG")?;
    let store = JsonStore::load(&path)?;

    match &args.command {
        Command::Run {
            accounts,
            dry_run,
            first_match_wins,
        } => {
            config.dry_run |= *dry_run;
            if *first_match_wins {
                config.match_policy = MatchPolicy::FirstMatchWins;
            }
            return cmd_run(store, config, &args, accounts).await;
        }
        Command::Accounts => cmd_accounts(&store, &args)?,
        Command::Rules { account } => {
            cmd_rules(&store, &args, account.as_deref())?;
        }
        Command::ImportLegacy { file, account } => {
            cmd_import_legacy(store, &args, file, account.as_deref())?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(
    store: JsonStore,
    config: EngineConfig,
    args: &Args,
    only: &[String],
) -> anyhow::Result<ExitCode> {
    let selected: Option<Vec<Account>> = if only.is_empty() {
        None
    } else {
        let all = store.list_accounts()?;
        for id in only {
            if !all.iter().any(|a| &a.id == id) {
                anyhow::bail!("Unknown account: {id}");
            }
        }
        Some(all.into_iter().filter(|a| only.contains(&a.id)).collect())
    };

    let provider = ImapProvider::from_config(&config);
    let engine = Engine::new(provider, EnvCredentials, store, config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after current command");
            on_signal.cancel();
        }
    });

    let report = engine
        .run_filters_with_cancel(selected.as_deref(), &cancel)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report);
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_accounts(store: &JsonStore, args: &Args) -> anyhow::Result<()> {
    let accounts = store.list_accounts()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!("No accounts configured.");
        return Ok(());
    }
    println!(
        "{:<32} {:<30} {:<6} {}",
        "Account", "Host", "Port", "Encryption"
    );
    println!("{}", "-".repeat(84));
    for account in &accounts {
        println!(
            "{:<32} {:<30} {:<6} {}",
            truncate(&account.id, 30),
            truncate(&account.host, 28),
            account.port,
            account.encryption
        );
    }
    Ok(())
}

fn cmd_rules(
    store: &JsonStore,
    args: &Args,
    account: Option<&str>,
) -> anyhow::Result<()> {
    let global = store.load_global_rules()?;
    let rules: Vec<FilterRule> = match account {
        Some(id) => {
            let own = store.load_account_rules(id)?;
            inbox_filter::filter_set(&global, &own, id)
        }
        None => store.data().rules.clone(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    if rules.is_empty() {
        println!("No rules.");
        return Ok(());
    }
    for (i, rule) in rules.iter().enumerate() {
        let scope = match &rule.scope {
            Scope::Global => "global",
            Scope::Account(id) => id.as_str(),
        };
        println!("{:>3}. [{scope}] {}", i + 1, rule.label());
    }
    Ok(())
}

fn cmd_import_legacy(
    mut store: JsonStore,
    args: &Args,
    file: &Path,
    account: Option<&str>,
) -> anyhow::Result<()> {
    let scope =
        account.map_or(Scope::Global, |id| Scope::Account(id.to_string()));
    let rules = legacy::load_file(file, &scope)?;
    let count = rules.len();
    store.add_rules(rules);
    store.save()?;

    if args.json {
        let summary =
            serde_json::json!({ "imported": count, "path": store.path() });
        println!("{summary}");
    } else {
        println!("Imported {count} rule(s) into {}", store.path().display());
    }
    Ok(())
}

fn print_run_report(report: &RunReport) {
    if report.accounts.is_empty() {
        println!("No accounts processed.");
        return;
    }

    for account in &report.accounts {
        print_account(account);
    }

    let took = report.finished_at - report.started_at;
    println!(
        "\n{} account(s) in {}ms",
        report.accounts.len(),
        took.num_milliseconds()
    );
}

fn print_account(account: &AccountReport) {
    let dry = if account.dry_run { " (dry run)" } else { "" };
    println!(
        "{} [{}]{dry}: {} matched, {} applied",
        account.account,
        account.status,
        account.matched(),
        account.applied()
    );
    if let Some(error) = &account.error {
        println!("  error: {error}");
    }
    for rule in &account.rules {
        println!(
            "  {:<50} {:>5} matched {:>5} applied",
            truncate(&rule.rule, 48),
            rule.matched,
            rule.applied
        );
        for error in &rule.errors {
            println!("    ! {error}");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String =
            s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
