use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{anyhow, bail};
use clap::{ArgAction, Parser};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::config::{Config, is_known_key};

/// Arguments left for clap, plus the `rc.<key>=<value>` settings that
/// were pulled out of them.
#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "milestone",
    version,
    about = "Milestone: track goals by deadline and keep the nearest one in view",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Less log output (-q warn, -qq error).
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Override one setting, e.g. `--rc color=off`.
    #[arg(long = "rc", value_name = "KEY=VALUE", value_parser = parse_setting, action = ArgAction::Append)]
    pub rc_overrides: Vec<(String, String)>,

    /// Read this rc file instead of $MILESTONERC or ~/.milestonerc.
    #[arg(long = "rcfile", value_name = "FILE")]
    pub rcfile: Option<PathBuf>,

    /// Directory holding the ledger file; overrides data.location.
    #[arg(long = "data", value_name = "DIR")]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

fn parse_setting(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .or_else(|| raw.split_once(':'))
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if !is_known_key(key) {
        return Err(format!("unknown setting: {key}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// `-q` wins over `-v`; with neither, only warnings and errors show.
pub fn log_level(verbose: u8, quiet: u8) -> LevelFilter {
    match (quiet, verbose) {
        (q, _) if q >= 2 => LevelFilter::ERROR,
        (1, _) => LevelFilter::WARN,
        (_, 0) => LevelFilter::WARN,
        (_, 1) => LevelFilter::INFO,
        (_, 2) => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Logs go to stderr so `export` output stays clean. `RUST_LOG`, when
/// set, replaces the level picked by the flags.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(log_level(verbose, quiet).into())
        .from_env()
        .map_err(|e| anyhow!("invalid RUST_LOG: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls `rc.<key>=<value>` (or `rc.<key>:<value>`) words out of the
/// argument list. Words after `--` are left alone so they can reach a
/// command as plain text.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides = Vec::new();
    let mut literal = false;

    for (idx, arg) in raw.iter().enumerate() {
        let setting = arg
            .to_str()
            .filter(|_| idx > 0 && !literal)
            .and_then(|word| word.strip_prefix("rc."));

        match setting {
            Some(setting) => {
                let (key, value) = parse_setting(setting).map_err(|e| anyhow!("rc.{setting}: {e}"))?;
                debug!(key = %key, value = %value, "captured rc override");
                overrides.push((key, value));
            }
            None => {
                if arg == "--" {
                    literal = true;
                }
                cleaned.push(arg.clone());
            }
        }
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        let known = crate::commands::known_command_names();
        let (token, args) = match tokens.split_first() {
            Some((first, args)) => (first.as_str(), args.to_vec()),
            None => {
                debug!(command = cfg.default_command(), "no explicit command, using default");
                (cfg.default_command(), Vec::new())
            }
        };

        let Some(command) = crate::commands::expand_command_abbrev(token, &known) else {
            warn!(token, "unrecognized or ambiguous command");
            bail!("unknown command: {token} (try `milestone help`)");
        };

        debug!(token, expanded = command, "resolved command token");
        Ok(Self {
            command: command.to_string(),
            command_args: args,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;
    use tracing_subscriber::filter::LevelFilter;

    use super::{GlobalCli, Invocation, log_level, preprocess_args};
    use crate::config::Config;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn strips_positional_rc_overrides() {
        let pre = preprocess_args(&os(&[
            "milestone",
            "rc.data.file:goals.csv",
            "list",
            "--",
            "rc.color=off",
        ]))
        .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["milestone", "list", "--", "rc.color=off"]));
        assert_eq!(
            pre.rc_overrides,
            vec![("data.file".to_string(), "goals.csv".to_string())]
        );
    }

    #[test]
    fn unknown_rc_key_is_rejected() {
        assert!(preprocess_args(&os(&["milestone", "rc.colour=off"])).is_err());
        assert!(GlobalCli::try_parse_from(["milestone", "--rc", "colour=off"]).is_err());

        let cli = GlobalCli::try_parse_from(["milestone", "--rc", "color=off", "show"])
            .expect("parse");
        assert_eq!(cli.rc_overrides, vec![("color".to_string(), "off".to_string())]);
        assert_eq!(cli.rest, os(&["show"]));
    }

    #[test]
    fn flags_pick_the_log_level() {
        assert_eq!(log_level(0, 0), LevelFilter::WARN);
        assert_eq!(log_level(1, 0), LevelFilter::INFO);
        assert_eq!(log_level(2, 0), LevelFilter::DEBUG);
        assert_eq!(log_level(5, 0), LevelFilter::TRACE);
        assert_eq!(log_level(3, 1), LevelFilter::WARN);
        assert_eq!(log_level(0, 2), LevelFilter::ERROR);
    }

    #[test]
    fn expands_unique_prefixes() {
        let cfg = Config::default();
        let inv = Invocation::parse(&cfg, os(&["comp", "result:yes", "nice"])).expect("parse");
        assert_eq!(inv.command, "complete");
        assert_eq!(inv.command_args, vec!["result:yes", "nice"]);

        let inv = Invocation::parse(&cfg, vec![]).expect("parse");
        assert_eq!(inv.command, "show");
    }

    #[test]
    fn default_command_comes_from_config() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("default.command".to_string(), "li".to_string())])
            .expect("override");
        let inv = Invocation::parse(&cfg, vec![]).expect("parse");
        assert_eq!(inv.command, "list");
    }

    #[test]
    fn rejects_ambiguous_prefix() {
        let cfg = Config::default();
        assert!(Invocation::parse(&cfg, os(&["e"])).is_err());
    }
}
