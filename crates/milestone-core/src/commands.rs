use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::STORAGE_DATE_FORMAT;
use crate::error::LedgerError;
use crate::render::Renderer;
use crate::service::{LedgerService, LedgerState};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "show", "add", "edit", "complete", "list", "export", "_show", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(service, cfg, renderer, inv))]
pub fn dispatch(
    service: &LedgerService,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "show" => cmd_show(service, renderer),
        "add" => cmd_add(service, renderer, &inv.command_args),
        "edit" => cmd_edit(service, renderer, &inv.command_args),
        "complete" => cmd_complete(service, renderer, &inv.command_args),
        "list" => cmd_list(service, renderer),
        "export" => cmd_export(service),
        "_show" => cmd_show_config(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Loads the ledger for a command. Storage trouble is reported but not
/// fatal: read-only commands go on with the default event.
fn load_ledger(service: &LedgerService) -> LedgerState {
    match service.load() {
        Ok(state) => {
            if let Some(LedgerError::MalformedRecord { .. }) = service.last_error() {
                eprintln!(
                    "warning: skipped {} malformed row(s) in {}",
                    service.malformed_count(),
                    service.path().display()
                );
            }
            state
        }
        Err(err) => {
            eprintln!("warning: {err}; showing the default event");
            service.state()
        }
    }
}

fn report_warning(service: &LedgerService) {
    if let Some(err) = service.last_error()
        && err.is_warning()
    {
        eprintln!("warning: {err}");
    }
}

#[instrument(skip(service, renderer))]
fn cmd_show(service: &LedgerService, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command show");
    load_ledger(service);
    renderer.print_current(&service.current_event_view())
}

#[instrument(skip(service, renderer, args))]
fn cmd_add(service: &LedgerService, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command add");

    let mods = parse_mods(args, ModKey::Name)?;
    let name = mods
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| anyhow!("add: name is required (name:<..>)"))?;
    let content = mods.content.unwrap_or_default();
    let due = mods.due.unwrap_or_else(|| "tomorrow".to_string());

    load_ledger(service);
    service
        .append_next(&name, &content, &due)
        .context("failed to add event")?;

    println!("Added event {}.", name.trim());
    renderer.print_current(&service.current_event_view())
}

#[instrument(skip(service, renderer, args))]
fn cmd_edit(service: &LedgerService, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command edit");

    let mods = parse_mods(args, ModKey::Name)?;
    if mods.name.is_none() && mods.content.is_none() && mods.due.is_none() {
        return Err(anyhow!("edit: nothing to change (use name:, content: or due:)"));
    }

    load_ledger(service);
    let current = service.current_event();
    let name = mods.name.unwrap_or(current.name);
    let content = mods.content.unwrap_or(current.content);
    let due = mods
        .due
        .unwrap_or_else(|| current.due_date.format(STORAGE_DATE_FORMAT).to_string());

    service
        .edit_current(&name, &content, &due)
        .context("failed to edit current event")?;
    report_warning(service);

    renderer.print_current(&service.current_event_view())
}

#[instrument(skip(service, renderer, args))]
fn cmd_complete(
    service: &LedgerService,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command complete");

    let mods = parse_mods(args, ModKey::Feedback)?;
    let achieved = mods.result.unwrap_or(false);
    let feedback = mods.feedback.unwrap_or_default();

    load_ledger(service);
    let name = service.current_event().name;
    service
        .complete_current(achieved, &feedback)
        .context("failed to complete current event")?;
    report_warning(service);

    println!(
        "Completed {name} ({}).",
        if achieved { "achieved" } else { "missed" }
    );
    renderer.print_current(&service.current_event_view())
}

#[instrument(skip(service, renderer))]
fn cmd_list(service: &LedgerService, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command list");

    load_ledger(service);
    let records = service.records();
    if records.is_empty() {
        println!("No events.");
        return Ok(());
    }
    renderer.print_event_table(&records, service.today(), &service.options().date_format)
}

#[instrument(skip(service))]
fn cmd_export(service: &LedgerService) -> anyhow::Result<()> {
    info!("command export");

    load_ledger(service);
    let out = serde_json::to_string(&service.records())?;
    println!("{out}");
    Ok(())
}

fn cmd_show_config(cfg: &Config) -> anyhow::Result<()> {
    for (key, setting) in cfg.settings() {
        println!("{key}={}  # {}", setting.value, setting.origin);
    }
    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands: show, add name:<..> [content:<..>] [due:<date>], edit [name:<..>] [content:<..>] [due:<date>], \
         complete [result:<yes|no>] [feedback:<..>], list, export, version\n\
         Dates: YYYY-MM-DD, today, tomorrow, +Nd, +Nw"
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModKey {
    Name,
    Content,
    Due,
    Result,
    Feedback,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Mods {
    name: Option<String>,
    content: Option<String>,
    due: Option<String>,
    result: Option<bool>,
    feedback: Option<String>,
}

/// Parses `key:value` words. A word without a known key continues the
/// previous value (or starts the `bare` field), so values may contain
/// spaces without quoting.
#[instrument(skip(args))]
fn parse_mods(args: &[String], bare: ModKey) -> anyhow::Result<Mods> {
    let mut texts: Vec<(ModKey, String)> = Vec::new();
    let mut literal = false;

    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        let keyed = if literal {
            None
        } else {
            split_mod(arg)
        };

        match keyed {
            Some((key, value)) => texts.push((key, value.to_string())),
            None => match texts.last_mut() {
                Some((_, text)) => {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(arg);
                }
                None => texts.push((bare, arg.clone())),
            },
        }
    }

    let mut mods = Mods::default();
    for (key, value) in texts {
        match key {
            ModKey::Name => mods.name = Some(value),
            ModKey::Content => mods.content = Some(value),
            ModKey::Due => mods.due = Some(value),
            ModKey::Feedback => mods.feedback = Some(value),
            ModKey::Result => mods.result = Some(parse_result(&value)?),
        }
    }

    Ok(mods)
}

fn split_mod(tok: &str) -> Option<(ModKey, &str)> {
    let (key, value) = tok.split_once(':').or_else(|| tok.split_once('='))?;
    let key = match key.to_ascii_lowercase().as_str() {
        "name" => ModKey::Name,
        "content" | "desc" => ModKey::Content,
        "due" | "date" => ModKey::Due,
        "result" => ModKey::Result,
        "feedback" | "note" => ModKey::Feedback,
        other => {
            debug!(key = other, "not a modifier; treating as text");
            return None;
        }
    };
    Some((key, value))
}

fn parse_result(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "achieved" => Ok(true),
        "no" | "n" | "false" | "0" | "missed" => Ok(false),
        other => {
            warn!(value = other, "invalid result value");
            Err(anyhow!("invalid result: {other} (expected yes or no)"))
        }
    }
}
