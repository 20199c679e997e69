pub mod cli;
pub mod codec;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod error;
pub mod record;
pub mod render;
pub mod selector;
pub mod service;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use crate::error::{
  LedgerError,
  LedgerResult
};
pub use crate::record::EventRecord;
pub use crate::service::{
  CurrentEventView,
  LedgerOptions,
  LedgerService,
  LedgerState
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting milestone"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rcfile.as_deref()
  )?;
  cfg.apply_overrides(
    pre
      .rc_overrides
      .into_iter()
      .chain(cli.rc_overrides)
  )?;

  let options = config::ledger_options(
    &cfg,
    cli.data.as_deref()
  )
  .context(
    "failed to resolve ledger \
     location"
  )?;
  let clock =
    datetime::SystemClock::from_config_value(
      cfg.timezone()
    );

  let service = LedgerService::with_clock(
    options,
    Arc::new(clock)
  );

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    &service,
    &cfg,
    &mut renderer,
    inv
  )?;

  info!("done");
  Ok(())
}
