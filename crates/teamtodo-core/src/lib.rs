pub mod cli;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod ids;
pub mod mutation;
pub mod namespace;
pub mod notify;
pub mod render;
pub mod storage;
pub mod store;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
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
    "starting team to-do CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.todorc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let layout = cfg
    .layout()
    .context("invalid namespace.layout")?;

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let storage =
    storage::FileStorage::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open storage at {}",
        data_dir.display()
      )
    })?;

  let renderer =
    render::Renderer::new(&cfg);
  let mut out = std::io::stdout().lock();

  commands::dispatch(
    storage,
    layout,
    &renderer,
    &mut out,
    cli.command
  )?;

  info!("done");
  Ok(())
}
