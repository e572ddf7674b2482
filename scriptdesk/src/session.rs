//! Interactive session
//!
//! Reads commands from stdin while actions run in the background. Each
//! started action is spawned onto a [`JoinSet`]; its completion is applied
//! to the orchestrator on the session task, so the conversation is only
//! ever mutated from one place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use scriptdesk_core::api::{fetch_backend_logs, AssistantApi, HttpAssistantApi};
use scriptdesk_core::notify::{Notifier, Severity};
use scriptdesk_core::orchestrator::{
    perform, ActionKind, CompletedAction, Orchestrator, PendingAction,
};
use scriptdesk_core::preferences::{PreferenceStore, TomlPreferenceStore};
use scriptdesk_core::conversation::SharedBlock;
use scriptdesk_core::types::BlockId;
use scriptdesk_core::Config;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{self, JoinError, JoinSet};

use crate::input::{self, BlockRef, Input, HELP};
use crate::render;

/// Spinner shared between the session and the notifier.
type SharedSpinner = Arc<Mutex<Option<ProgressBar>>>;

/// Prints notifications to stderr, above the spinner if one is shown.
struct TerminalNotifier {
    spinner: SharedSpinner,
}

impl Notifier for TerminalNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        tracing::debug!(severity = %severity, "{}", message);
        let line = format!("{:>8}: {}", severity.as_str(), message);
        match self.spinner.lock().ok().and_then(|s| s.clone()) {
            Some(bar) => bar.suspend(|| eprintln!("{}", line)),
            None => eprintln!("{}", line),
        }
    }
}

enum Event {
    Line(std::io::Result<Option<String>>),
    Done(std::result::Result<(task::Id, CompletedAction), JoinError>),
}

enum Flow {
    Continue,
    Quit,
}

struct Session {
    orchestrator: Orchestrator,
    api: Arc<dyn AssistantApi>,
    preferences: TomlPreferenceStore,
    in_flight: JoinSet<CompletedAction>,
    /// Started actions by task, so a task that dies can still be completed
    started: HashMap<task::Id, PendingAction>,
    /// Lines typed since the current edit was opened
    draft: Vec<String>,
    spinner: SharedSpinner,
}

/// Run the interactive session until `:quit` or end of input.
///
/// At end of input the session waits for running actions to finish.
pub async fn run(config: &Config, preferences: TomlPreferenceStore) -> Result<()> {
    let api = HttpAssistantApi::new(&config.backend).context("failed to create backend client")?;
    let spinner: SharedSpinner = Arc::new(Mutex::new(None));
    let notifier = Arc::new(TerminalNotifier {
        spinner: spinner.clone(),
    });
    let orchestrator = Orchestrator::from_config(config, preferences.load(), notifier);

    println!("scriptdesk - backend {} (:help for commands)", api.base_url());
    tracing::info!(backend = %api.base_url(), "Session started");

    let mut session = Session {
        orchestrator,
        api: Arc::new(api),
        preferences,
        in_flight: JoinSet::new(),
        started: HashMap::new(),
        draft: Vec::new(),
        spinner,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        if !stdin_open && session.in_flight.is_empty() {
            break;
        }
        let event = tokio::select! {
            line = lines.next_line(), if stdin_open => Event::Line(line),
            Some(done) = session.in_flight.join_next_with_id(), if !session.in_flight.is_empty() => Event::Done(done),
            else => break,
        };
        session.orchestrator.expire_animations(Utc::now());

        match event {
            Event::Line(Ok(Some(line))) => match session.handle_line(&line).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(e) => eprintln!("   error: {:#}", e),
            },
            Event::Line(Ok(None)) => {
                stdin_open = false;
                if !session.in_flight.is_empty() {
                    eprintln!(
                        "    info: waiting for {} running action(s)",
                        session.in_flight.len()
                    );
                }
            }
            Event::Line(Err(e)) => return Err(e).context("failed to read input"),
            Event::Done(Ok((id, completed))) => {
                session.started.remove(&id);
                session.complete(completed);
            }
            Event::Done(Err(e)) => session.abandon(e),
        }
        session.refresh_spinner()?;
    }

    if !session.in_flight.is_empty() {
        tracing::info!(pending = session.in_flight.len(), "Discarding running actions");
        session.in_flight.abort_all();
    }
    session.clear_spinner();
    tracing::info!("Session ended");
    Ok(())
}

impl Session {
    async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        // While editing, plain lines are draft text.
        if self.orchestrator.editing().is_some() && !line.trim_start().starts_with(':') {
            self.draft.push(line.to_string());
            self.orchestrator.update_draft(self.draft.join("\n"));
            return Ok(Flow::Continue);
        }

        match input::parse(line)? {
            Input::Text(text) => {
                if text.trim().is_empty() {
                    return Ok(Flow::Continue);
                }
                let started = self.orchestrator.submit_prompt(&text);
                self.start(started);
            }
            Input::Review(n) => {
                let id = self.block_id(&n)?;
                let started = self.orchestrator.review(&id);
                self.start(started);
            }
            Input::Run(n) => {
                let id = self.block_id(&n)?;
                let started = self.orchestrator.execute(&id);
                self.start(started);
            }
            Input::Debug(n) => {
                let id = self.block_id(&n)?;
                let started = self.orchestrator.debug(&id);
                self.start(started);
            }
            Input::Explain(n) => {
                let id = self.block_id(&n)?;
                let started = self.orchestrator.explain(&id);
                self.start(started);
            }
            Input::Install { block, package } => {
                let id = self.block_id(&block)?;
                let started = self.orchestrator.install(&id, package.as_deref());
                self.start(started);
            }
            Input::Apply(n) => {
                let id = self.block_id(&n)?;
                if let Ok(new_id) = self.orchestrator.apply_corrected_code(&id) {
                    self.draft.clear();
                    print!("{}", render::blocks(&self.orchestrator, &[new_id]));
                    println!("Type the new code, then :save or :cancel");
                }
            }
            Input::Edit(n) => {
                let id = self.block_id(&n)?;
                self.draft.clear();
                if self.orchestrator.begin_edit(&id).is_ok() && self.orchestrator.editing().is_some() {
                    print!("{}", render::blocks(&self.orchestrator, &[id]));
                    println!("Type the new code, then :save or :cancel");
                }
            }
            Input::Save => {
                let Some(id) = self.orchestrator.editing().map(|e| e.block_id) else {
                    return Err(anyhow!("nothing is being edited"));
                };
                self.draft.clear();
                if self.orchestrator.save_edit(&id).is_ok() {
                    print!("{}", render::blocks(&self.orchestrator, &[id]));
                }
            }
            Input::Cancel => {
                self.draft.clear();
                if self.orchestrator.cancel_edit().is_none() {
                    return Err(anyhow!("nothing is being edited"));
                }
            }
            Input::Toggle(n) => {
                let id = self.block_id(&n)?;
                match self.orchestrator.toggle_round(&id) {
                    Some(_) => print!("{}", render::conversation(&self.orchestrator)),
                    None => return Err(anyhow!("block {} does not start a round", n)),
                }
            }
            Input::Show => print!("{}", render::conversation(&self.orchestrator)),
            Input::Set { key, value } => self.set_preference(&key, &value)?,
            Input::Logs(lines) => {
                let deadline = self.orchestrator.settings().timeout;
                let log_lines = fetch_backend_logs(self.api.as_ref(), lines, deadline)
                    .await
                    .context("failed to fetch backend logs")?;
                for line in log_lines {
                    println!("{}", line);
                }
            }
            Input::Help => println!("{}", HELP),
            Input::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Spawn the remote half of a started action. Rejections were already
    /// reported by the orchestrator.
    fn start(&mut self, started: scriptdesk_core::Result<PendingAction>) {
        let pending = match started {
            Ok(pending) => pending,
            Err(e) if e.is_validation() => return,
            Err(e) => {
                eprintln!("   error: {}", e);
                return;
            }
        };

        if let Some(placeholder) = pending.placeholder() {
            let shown = if pending.kind() == ActionKind::Generate {
                vec![pending.anchor(), placeholder]
            } else {
                vec![placeholder]
            };
            print!("{}", render::blocks(&self.orchestrator, &shown));
        }
        tracing::debug!(kind = %pending.kind(), "Spawning action");

        let api = self.api.clone();
        let started = pending.clone();
        let handle = self
            .in_flight
            .spawn(async move { perform(api.as_ref(), pending).await });
        self.started.insert(handle.id(), started);
    }

    fn complete(&mut self, completed: CompletedAction) {
        let ids: Vec<BlockId> = self.orchestrator.complete(completed);
        print!("{}", render::blocks(&self.orchestrator, &ids));
    }

    /// Fail the action whose task died, clearing its busy flag and
    /// placeholder.
    fn abandon(&mut self, error: JoinError) {
        tracing::error!(error = %error, "Action task failed");
        match self.started.remove(&error.id()) {
            Some(pending) => {
                let reason = format!("action task failed: {}", error);
                self.complete(CompletedAction::abandoned(pending, reason));
            }
            None => eprintln!("   error: action task failed: {}", error),
        }
    }

    fn block_id(&self, block: &BlockRef) -> Result<BlockId> {
        resolve(self.orchestrator.blocks(), block)
    }

    fn set_preference(&mut self, key: &str, value: &str) -> Result<()> {
        self.orchestrator
            .preferences_mut()
            .set(key, value)
            .with_context(|| format!("cannot set {}", key))?;
        self.preferences
            .save(self.orchestrator.preferences())
            .context("failed to save preferences")?;
        print!("{}", render::preferences(self.orchestrator.preferences()));
        Ok(())
    }

    /// Show the spinner while anything is pending.
    fn refresh_spinner(&self) -> Result<()> {
        let pending = self.orchestrator.board().pending_kinds();
        let mut spinner = self
            .spinner
            .lock()
            .map_err(|_| anyhow!("spinner lock poisoned"))?;

        if pending.is_empty() {
            if let Some(bar) = spinner.take() {
                bar.finish_and_clear();
            }
            return Ok(());
        }

        let message = pending
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let bar = match spinner.as_ref() {
            Some(bar) => bar.clone(),
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
                bar.enable_steady_tick(Duration::from_millis(120));
                *spinner = Some(bar.clone());
                bar
            }
        };
        bar.set_message(format!("working: {}", message));
        Ok(())
    }

    fn clear_spinner(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(bar) = spinner.take() {
                bar.finish_and_clear();
            }
        }
    }
}

/// Find the block `reference` names in `blocks`.
fn resolve(blocks: &[SharedBlock], reference: &BlockRef) -> Result<BlockId> {
    match reference {
        BlockRef::Number(number) => blocks
            .get(number.saturating_sub(1))
            .map(|b| b.id)
            .ok_or_else(|| anyhow!("there is no block {} (:show lists them)", number)),
        BlockRef::Id(prefix) => {
            let mut matches = blocks.iter().filter(|b| b.id.short().starts_with(prefix.as_str()));
            match (matches.next(), matches.next()) {
                (Some(block), None) => Ok(block.id),
                (Some(_), Some(_)) => Err(anyhow!("@{} matches more than one block", prefix)),
                (None, _) => Err(anyhow!("there is no block @{} (:show lists them)", prefix)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptdesk_core::types::{ArtifactKind, Block};

    fn shared(blocks: Vec<Block>) -> Vec<SharedBlock> {
        blocks.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_resolve_by_number_and_id() {
        let blocks = shared(vec![
            Block::user_request("list files"),
            Block::artifact("ls", ArtifactKind::Shell),
        ]);
        let artifact = blocks[1].id;

        assert_eq!(resolve(&blocks, &BlockRef::Number(2)).unwrap(), artifact);
        assert!(resolve(&blocks, &BlockRef::Number(3)).is_err());
        assert_eq!(
            resolve(&blocks, &BlockRef::Id(artifact.short())).unwrap(),
            artifact
        );
    }

    #[test]
    fn test_id_survives_blocks_added_above() {
        let mut blocks = shared(vec![
            Block::user_request("list files"),
            Block::artifact("ls", ArtifactKind::Shell),
        ]);
        let artifact = blocks[1].id;
        let reference = BlockRef::Id(artifact.short());

        blocks.insert(1, Arc::new(Block::placeholder("reviewing")));

        assert_eq!(resolve(&blocks, &reference).unwrap(), artifact);
        assert_ne!(resolve(&blocks, &BlockRef::Number(2)).unwrap(), artifact);
    }

    #[test]
    fn test_empty_prefix_is_ambiguous_or_missing() {
        let blocks = shared(vec![Block::user_request("a"), Block::user_request("b")]);
        let err = resolve(&blocks, &BlockRef::Id(String::new())).unwrap_err();
        assert!(err.to_string().contains("more than one"));
        assert!(resolve(&[], &BlockRef::Id("abc".to_string())).is_err());
    }
}
