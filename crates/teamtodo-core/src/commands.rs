use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument};

use crate::cli::Command;
use crate::error::TaskError;
use crate::identity::{self, Identity};
use crate::namespace::Layout;
use crate::notify::{NoticeLevel, RecordingNotifier};
use crate::render::Renderer;
use crate::storage::Storage;
use crate::store::TaskStore;
use crate::task::Role;

/// Runs one CLI command against `storage`, writing output to `out`.
#[instrument(skip(storage, renderer, out))]
pub fn dispatch<S: Storage, W: Write>(
    storage: S,
    layout: Layout,
    renderer: &Renderer,
    out: &mut W,
    command: Command,
) -> anyhow::Result<()> {
    let notifier = RecordingNotifier::new();
    let mut store = TaskStore::new(storage, layout, Arc::new(notifier.clone()));

    let result = match command {
        Command::Login { name, role } => cmd_login(&mut store, out, &name, role),
        Command::Logout => cmd_logout(&store, out),
        Command::Whoami => cmd_whoami(&store, out),
        Command::List { query, status } => {
            open_restored(&mut store)?;
            let tasks = store.filtered(&query, status);
            debug!(shown = tasks.len(), total = store.tasks().len(), "listing tasks");
            renderer.write_task_table(out, &tasks)
        }
        Command::Add { title, description } => {
            open_restored(&mut store)?;
            let added = store
                .add(&title, &description)
                .map(|tasks| tasks.last().map(|t| t.id));
            finish_mutation(added)
                .and_then(|id| report_id(out, id))
        }
        Command::Toggle { id } => {
            open_restored(&mut store)?;
            finish_mutation(store.toggle(id).map(|_| ()))
        }
        Command::Edit {
            id,
            title,
            description,
        } => {
            open_restored(&mut store)?;
            finish_mutation(store.edit(id, &title, &description).map(|_| ()))
        }
        Command::Delete { id } => {
            open_restored(&mut store)?;
            finish_mutation(store.delete(id).map(|_| ()))
        }
    };

    // A failed command reports through its error; its notices would repeat it.
    for notice in notifier.take() {
        if result.is_ok() || notice.level != NoticeLevel::Error {
            renderer.write_notice(out, &notice)?;
        }
    }
    result
}

fn open_restored<S: Storage>(store: &mut TaskStore<S>) -> anyhow::Result<()> {
    let identity = identity::restore(store.storage())
        .context("failed to read stored session")?
        .ok_or_else(|| anyhow!("not logged in; run `todo login <name>` first"))?;
    store.open_session(&identity.user, identity.role);
    Ok(())
}

fn finish_mutation<T>(result: Result<T, TaskError>) -> anyhow::Result<T> {
    result.map_err(|err| anyhow!(err))
}

fn report_id<W: Write>(out: &mut W, id: Option<i64>) -> anyhow::Result<()> {
    if let Some(id) = id {
        writeln!(out, "Created task {id}.")?;
    }
    Ok(())
}

fn cmd_login<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    out: &mut W,
    name: &str,
    role: Role,
) -> anyhow::Result<()> {
    let identity = Identity::new(name, role).map_err(|err| anyhow!(err))?;
    identity::persist(store.storage(), &identity).context("failed to store session")?;
    let count = store.open_session(&identity.user, identity.role).len();
    info!(user = %identity.user, %role, count, "logged in");
    writeln!(
        out,
        "Logged in as {} ({}). {} task(s) visible.",
        identity.user, identity.role, count
    )?;
    Ok(())
}

fn cmd_logout<S: Storage, W: Write>(store: &TaskStore<S>, out: &mut W) -> anyhow::Result<()> {
    identity::clear(store.storage()).context("failed to clear session")?;
    writeln!(out, "Logged out.")?;
    Ok(())
}

fn cmd_whoami<S: Storage, W: Write>(store: &TaskStore<S>, out: &mut W) -> anyhow::Result<()> {
    match identity::restore(store.storage()).context("failed to read stored session")? {
        Some(identity) => {
            let keys = store.resolve_namespace(&identity.user, identity.role);
            writeln!(out, "user      {}", identity.user)?;
            writeln!(out, "role      {}", identity.role)?;
            writeln!(out, "primary   {}", keys.primary)?;
            writeln!(out, "fallback  {}", keys.fallback)?;
            if identity.role.can_write() {
                writeln!(out, "writes    {}", keys.write_targets().join(", "))?;
            }
        }
        None => writeln!(out, "Not logged in.")?,
    }
    Ok(())
}
