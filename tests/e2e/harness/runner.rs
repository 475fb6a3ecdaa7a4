use super::assertions::Assertion;
use super::clock::MockClock;
use super::steps::ScenarioStep;
use super::workspace::{parse_outline, TestWorkspace};
use anyhow::{anyhow, bail, ensure, Context as _, Result};
use outline_core::{
    encode_path, Config, Context, Database, FeedStatus, MirrorState, RecordId,
    Session, Store, StoreError, Subscription, Thought, ThoughtPath,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One session with its pull feed and the local state it keeps current.
struct Tab {
    store: Store,
    feed: Subscription,
    mirror: MirrorState,
}

/// Executes scenarios against a real database shared by several tabs
pub struct ScenarioRunner {
    db: Arc<Database>,
    observer: Store,
    tabs: HashMap<String, Tab>,
    clock: MockClock,
    last_error: Option<StoreError>,
    current_step: usize,
    workspace: TestWorkspace,
}

fn ids(values: &[String]) -> ThoughtPath {
    values.iter().map(|v| RecordId::hash_text(v)).collect()
}

impl ScenarioRunner {
    pub fn new(config: Config) -> Result<Self> {
        let workspace = TestWorkspace::empty()?;
        let db = workspace.open_database(config)?;
        let clock = MockClock::new();
        let observer = db.connect_with(
            Session::with_id("observer").with_time_provider(clock.as_provider()),
        );

        Ok(Self {
            db,
            observer,
            tabs: HashMap::new(),
            clock,
            last_error: None,
            current_step: 0,
            workspace,
        })
    }

    /// Get current step number
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Execute all steps in sequence
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("Step {}: {:?}", i, step))?;
        }
        Ok(())
    }

    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::OpenTab { tab } => self.handle_open_tab(tab),
            ScenarioStep::Sync { tab } => {
                let tab = self.tab(tab)?;
                tab.feed.process_pending(&tab.mirror);
                Ok(())
            }
            ScenarioStep::Resync { tab } => self.handle_resync(tab),
            ScenarioStep::Add {
                tab,
                parents,
                value,
            } => link(&self.tab(tab)?.store, parents, value).map(|_| ()),
            ScenarioStep::Unlink {
                tab,
                parents,
                value,
            } => unlink(&self.tab(tab)?.store, parents, value),
            ScenarioStep::DeleteThought { tab, value } => {
                Ok(self.tab(tab)?.store.delete_thought(&RecordId::hash_text(value))?)
            }
            ScenarioStep::BulkWrite {
                tab,
                linked,
                orphaned,
            } => self.handle_bulk_write(tab, linked, orphaned),
            ScenarioStep::ImportFixture { tab, name } => self.handle_import(tab, name),
            ScenarioStep::ClearAll { tab } => Ok(self.tab(tab)?.store.clear_all()?),
            ScenarioStep::RebuildIndex { tab } => {
                let report = self.tab(tab)?.store.rebuild_word_index()?;
                ensure!(
                    report.corrupted_thoughts.is_empty(),
                    "Rebuild skipped {} thoughts",
                    report.corrupted_thoughts.len()
                );
                Ok(())
            }
            ScenarioStep::SetCursor { tab, path } => {
                self.tab(tab)?.store.update_cursor(Some(ids(path)))?;
                Ok(())
            }
            ScenarioStep::ClearCursor { tab } => {
                self.tab(tab)?.store.delete_cursor()?;
                Ok(())
            }
            ScenarioStep::MarkEdited { tab, path } => {
                let store = &self.tab(tab)?.store;
                let mut recent = store.get_helpers()?.recently_edited;
                recent.insert(encode_path(&ids(path)), self.clock.now());
                store.update_recently_edited(recent)?;
                Ok(())
            }
            ScenarioStep::ConcurrentCursorUpdates { tabs } => self.handle_concurrent_cursor(tabs),
            ScenarioStep::Relay { batch } => {
                self.db.relay(batch.clone());
                Ok(())
            }
            ScenarioStep::AdvanceClock { secs } => {
                self.clock.advance_secs(*secs);
                Ok(())
            }
            ScenarioStep::Assert { assertion } => self.handle_assertion(assertion),
        }
    }

    fn tab(&self, name: &str) -> Result<&Tab> {
        self.tabs
            .get(name)
            .ok_or_else(|| anyhow!("No tab named {:?}", name))
    }

    // ===== Tab handlers =====

    fn handle_open_tab(&mut self, name: &str) -> Result<()> {
        if self.tabs.contains_key(name) {
            bail!("Tab {:?} already open", name);
        }
        let store = self
            .db
            .connect_with(Session::with_id(name).with_time_provider(self.clock.as_provider()));
        let feed = store.changes();
        let mirror = MirrorState::load(&store)?;
        self.tabs
            .insert(name.to_string(), Tab { store, feed, mirror });
        Ok(())
    }

    fn handle_resync(&mut self, name: &str) -> Result<()> {
        let tab = self
            .tabs
            .get_mut(name)
            .ok_or_else(|| anyhow!("No tab named {:?}", name))?;
        tab.feed = tab.store.changes();
        tab.mirror = MirrorState::load(&tab.store)?;
        Ok(())
    }

    fn handle_bulk_write(&mut self, tab: &str, linked: &[String], orphaned: &[String]) -> Result<()> {
        let updates = linked
            .iter()
            .map(|v| Thought::new(v.as_str(), vec![RecordId::root()]))
            .chain(orphaned.iter().map(|v| Thought::new(v.as_str(), Vec::new())))
            .map(|t| (t.id, Some(t)))
            .collect::<Vec<_>>();

        let result = self.tab(tab)?.store.update_thought_index(updates);
        self.last_error = result.err();
        Ok(())
    }

    fn handle_import(&mut self, tab: &str, name: &str) -> Result<()> {
        let text = TestWorkspace::read_fixture(name)?;
        let store = &self.tab(tab)?.store;
        for (parents, value) in parse_outline(&text)? {
            link(store, &parents, &value)?;
        }
        Ok(())
    }

    fn handle_concurrent_cursor(&mut self, tabs: &[String]) -> Result<()> {
        let stores = tabs
            .iter()
            .map(|name| Ok((name.clone(), self.tab(name)?.store.clone())))
            .collect::<Result<Vec<_>>>()?;

        thread::scope(|scope| -> Result<()> {
            let handles: Vec<_> = stores
                .iter()
                .map(|(name, store)| {
                    scope.spawn(move || store.update_cursor(Some(vec![RecordId::hash_text(name)])))
                })
                .collect();
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| anyhow!("Cursor writer panicked"))??;
            }
            Ok(())
        })
    }

    // ===== Assertions =====

    fn handle_assertion(&mut self, assertion: &Assertion) -> Result<()> {
        match assertion {
            Assertion::ThoughtExists { value } => {
                self.stored_thought(value)?;
                Ok(())
            }
            Assertion::ThoughtMissing { value } => {
                let found = self
                    .observer
                    .get_thought_by_id(&RecordId::hash_text(value))?;
                ensure!(found.is_none(), "Thought {:?} still stored", value);
                Ok(())
            }
            Assertion::ThoughtContextCount { value, count } => {
                let thought = self.stored_thought(value)?;
                ensure!(
                    thought.contexts.len() == *count,
                    "Thought {:?} has {} contexts, expected {}",
                    value,
                    thought.contexts.len(),
                    count
                );
                Ok(())
            }
            Assertion::ChildrenAre { parents, values } => {
                let context_id = RecordId::hash_path(&ids(parents));
                let children: Vec<String> = self
                    .observer
                    .children_of(&context_id)?
                    .into_iter()
                    .map(|t| t.value)
                    .collect();
                ensure!(
                    &children == values,
                    "Children of {:?} are {:?}, expected {:?}",
                    parents,
                    children,
                    values
                );
                Ok(())
            }
            Assertion::ContextMissing { parents } => {
                let context_id = RecordId::hash_path(&ids(parents));
                ensure!(
                    self.observer.get_context_by_id(&context_id)?.is_none(),
                    "Context {:?} still stored",
                    parents
                );
                Ok(())
            }
            Assertion::ThoughtCount(n) => {
                let count = self.observer.get_thought_index()?.len();
                ensure!(count == *n, "Store holds {} thoughts, expected {}", count, n);
                Ok(())
            }
            Assertion::SearchReturns { query, values } => {
                let found: BTreeSet<String> = self
                    .observer
                    .full_text_search(query)?
                    .into_iter()
                    .map(|t| t.value)
                    .collect();
                let expected: BTreeSet<String> = values.iter().cloned().collect();
                ensure!(
                    found == expected,
                    "Search {:?} returned {:?}, expected {:?}",
                    query,
                    found,
                    expected
                );
                Ok(())
            }
            Assertion::WordsOf { value, words } => {
                let indexed = self
                    .observer
                    .get_words(&RecordId::hash_text(value))?
                    .ok_or_else(|| anyhow!("No word index entry for {:?}", value))?;
                ensure!(
                    &indexed == words,
                    "Words of {:?} are {:?}, expected {:?}",
                    value,
                    indexed,
                    words
                );
                Ok(())
            }
            Assertion::MirrorHas { tab, value } => {
                self.mirrored_thought(tab, value)?;
                Ok(())
            }
            Assertion::MirrorLacks { tab, value } => {
                let found = self.tab(tab)?.mirror.thought(&RecordId::hash_text(value));
                ensure!(found.is_none(), "Tab {:?} still mirrors {:?}", tab, value);
                Ok(())
            }
            Assertion::MirrorUpdatedBy {
                tab,
                value,
                session,
            } => {
                let thought = self.mirrored_thought(tab, value)?;
                ensure!(
                    &thought.updated_by == session,
                    "Tab {:?} mirrors {:?} written by {:?}, expected {:?}",
                    tab,
                    value,
                    thought.updated_by,
                    session
                );
                Ok(())
            }
            Assertion::MirrorContexts {
                tab,
                value,
                parents,
            } => {
                let thought = self.mirrored_thought(tab, value)?;
                let expected: Vec<RecordId> = parents
                    .iter()
                    .map(|p| RecordId::hash_path(&ids(p)))
                    .collect();
                ensure!(
                    thought.contexts == expected,
                    "Tab {:?} mirrors {:?} with contexts {:?}, expected {:?}",
                    tab,
                    value,
                    thought.contexts,
                    expected
                );
                Ok(())
            }
            Assertion::MirrorBatches { tab, count } => {
                let applied = self.tab(tab)?.mirror.batches_applied();
                ensure!(
                    applied == *count,
                    "Tab {:?} applied {} batches, expected {}",
                    tab,
                    applied,
                    count
                );
                Ok(())
            }
            Assertion::FeedClosed { tab } => {
                let tab_state = self.tab(tab)?;
                let status = tab_state
                    .feed
                    .process_next(&tab_state.mirror, Duration::from_millis(10));
                ensure!(
                    status == FeedStatus::Closed,
                    "Feed of tab {:?} is {:?}, expected Closed",
                    tab,
                    status
                );
                Ok(())
            }
            Assertion::CursorIs { path } => {
                let cursor = self.observer.get_helpers()?.cursor;
                let expected = path.as_ref().map(|p| ids(p));
                ensure!(
                    cursor == expected,
                    "Cursor is {:?}, expected {:?}",
                    cursor,
                    path
                );
                Ok(())
            }
            Assertion::CursorIsOneOf { values } => {
                let cursor = self
                    .observer
                    .get_helpers()?
                    .cursor
                    .ok_or_else(|| anyhow!("Cursor is not set"))?;
                let matched = values
                    .iter()
                    .any(|v| cursor == vec![RecordId::hash_text(v)]);
                ensure!(matched, "Cursor {:?} matches none of {:?}", cursor, values);
                Ok(())
            }
            Assertion::RecentlyEditedCount(n) => {
                let count = self.observer.get_helpers()?.recently_edited.len();
                ensure!(count == *n, "{} recently edited, expected {}", count, n);
                Ok(())
            }
            Assertion::LastErrorFailedKeys { values } => {
                let error = self
                    .last_error
                    .as_ref()
                    .ok_or_else(|| anyhow!("No error recorded"))?;
                let failed: BTreeSet<RecordId> = error.failed_keys().into_iter().collect();
                let expected: BTreeSet<RecordId> =
                    values.iter().map(|v| RecordId::hash_text(v)).collect();
                ensure!(
                    failed == expected,
                    "Failed keys {:?}, expected {:?} ({})",
                    failed,
                    expected,
                    error
                );
                Ok(())
            }
            Assertion::NoError => match &self.last_error {
                None => Ok(()),
                Some(e) => bail!("Unexpected error: {}", e),
            },
            Assertion::LogContains(text) => {
                let logs = self.observer.get_logs()?;
                ensure!(
                    logs.iter().any(|entry| entry.message.contains(text.as_str())),
                    "No log entry contains {:?}",
                    text
                );
                Ok(())
            }
            Assertion::Custom(check) => check(&self.observer),
        }
    }

    fn stored_thought(&self, value: &str) -> Result<Thought> {
        self.observer
            .get_thought_by_id(&RecordId::hash_text(value))?
            .ok_or_else(|| anyhow!("Thought {:?} not stored", value))
    }

    fn mirrored_thought(&self, tab: &str, value: &str) -> Result<Thought> {
        self.tab(tab)?
            .mirror
            .thought(&RecordId::hash_text(value))
            .ok_or_else(|| anyhow!("Tab {:?} does not mirror {:?}", tab, value))
    }
}

// ===== Outline editing, the way an application drives the store =====

/// Links `value` under the context at `parents`. A new child is appended
/// after the existing ones.
pub fn link(store: &Store, parents: &[String], value: &str) -> Result<Thought> {
    let path = ids(parents);
    let context_id = RecordId::hash_path(&path);
    let mut context = store
        .get_context_by_id(&context_id)?
        .unwrap_or_else(|| Context::new(path));

    let child_id = RecordId::hash_text(value);
    if !context.children.iter().any(|c| c.key == child_id) {
        let rank = context.next_rank();
        context.upsert_child(child_id, rank);
    }

    let mut thought = store
        .get_thought_by_id(&child_id)?
        .unwrap_or_else(|| Thought::new(value, Vec::new()));
    thought.add_context(context_id);

    let thought = store.update_thought(child_id, thought)?;
    store.update_context(context_id, context)?;
    Ok(thought)
}

/// Removes `value` from the context at `parents`, deleting the context or
/// the thought when nothing is left in it.
pub fn unlink(store: &Store, parents: &[String], value: &str) -> Result<()> {
    let context_id = RecordId::hash_path(&ids(parents));
    let child_id = RecordId::hash_text(value);

    let mut context = store
        .get_context_by_id(&context_id)?
        .ok_or_else(|| anyhow!("No context at {:?}", parents))?;
    if context.remove_child(&child_id) {
        store.delete_context(&context_id)?;
    } else {
        store.update_context(context_id, context)?;
    }

    if let Some(mut thought) = store.get_thought_by_id(&child_id)? {
        if thought.remove_context(&context_id) {
            store.delete_thought(&child_id)?;
        } else {
            store.update_thought(child_id, thought)?;
        }
    }
    Ok(())
}
