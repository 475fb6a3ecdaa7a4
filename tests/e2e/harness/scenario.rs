use super::assertions::Assertion;
use super::runner::ScenarioRunner;
use super::steps::ScenarioStep;
use outline_core::{ChangeBatch, Config};

/// Fluent DSL for building test scenarios
pub struct Scenario {
    name: String,
    config: Config,
    steps: Vec<ScenarioStep>,
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Scenario {
    /// Create a new scenario with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: Config::default(),
            steps: Vec::new(),
        }
    }

    // ===== Configuration =====

    /// Cap the number of search results
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.config.search.max_results = Some(max);
        self
    }

    /// Queue depth after which a subscriber is dropped as lagging
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.subscription.channel_capacity = capacity;
        self
    }

    // ===== Tabs =====

    /// Open a tab: a new session with its own feed and mirror
    pub fn tab(mut self, tab: &str) -> Self {
        self.steps.push(ScenarioStep::OpenTab {
            tab: tab.to_string(),
        });
        self
    }

    /// Deliver the tab's queued change batches
    pub fn sync(mut self, tab: &str) -> Self {
        self.steps.push(ScenarioStep::Sync {
            tab: tab.to_string(),
        });
        self
    }

    /// Reopen the tab's feed and reload its mirror
    pub fn resync(mut self, tab: &str) -> Self {
        self.steps.push(ScenarioStep::Resync {
            tab: tab.to_string(),
        });
        self
    }

    // ===== Outline edits =====

    /// Link `value` under the context at `parents`
    pub fn add(mut self, tab: &str, parents: &[&str], value: &str) -> Self {
        self.steps.push(ScenarioStep::Add {
            tab: tab.to_string(),
            parents: owned(parents),
            value: value.to_string(),
        });
        self
    }

    /// Remove `value` from the context at `parents`
    pub fn unlink(mut self, tab: &str, parents: &[&str], value: &str) -> Self {
        self.steps.push(ScenarioStep::Unlink {
            tab: tab.to_string(),
            parents: owned(parents),
            value: value.to_string(),
        });
        self
    }

    pub fn delete(mut self, tab: &str, value: &str) -> Self {
        self.steps.push(ScenarioStep::DeleteThought {
            tab: tab.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Bulk-write root thoughts, plus context-less ones that must fail
    pub fn bulk_write(mut self, tab: &str, linked: &[&str], orphaned: &[&str]) -> Self {
        self.steps.push(ScenarioStep::BulkWrite {
            tab: tab.to_string(),
            linked: owned(linked),
            orphaned: owned(orphaned),
        });
        self
    }

    /// Import `fixtures/<name>.outline`
    pub fn import_fixture(mut self, tab: &str, name: &str) -> Self {
        self.steps.push(ScenarioStep::ImportFixture {
            tab: tab.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn clear_all(mut self, tab: &str) -> Self {
        self.steps.push(ScenarioStep::ClearAll {
            tab: tab.to_string(),
        });
        self
    }

    pub fn rebuild_index(mut self, tab: &str) -> Self {
        self.steps.push(ScenarioStep::RebuildIndex {
            tab: tab.to_string(),
        });
        self
    }

    // ===== Helpers =====

    pub fn set_cursor(mut self, tab: &str, path: &[&str]) -> Self {
        self.steps.push(ScenarioStep::SetCursor {
            tab: tab.to_string(),
            path: owned(path),
        });
        self
    }

    pub fn clear_cursor(mut self, tab: &str) -> Self {
        self.steps.push(ScenarioStep::ClearCursor {
            tab: tab.to_string(),
        });
        self
    }

    /// Record `path` in the recently edited map
    pub fn mark_edited(mut self, tab: &str, path: &[&str]) -> Self {
        self.steps.push(ScenarioStep::MarkEdited {
            tab: tab.to_string(),
            path: owned(path),
        });
        self
    }

    /// Every listed tab writes the cursor from its own thread
    pub fn concurrent_cursor_updates(mut self, tabs: &[&str]) -> Self {
        self.steps.push(ScenarioStep::ConcurrentCursorUpdates { tabs: owned(tabs) });
        self
    }

    // ===== Environment =====

    /// Inject a change batch from outside the scenario's tabs
    pub fn relay(mut self, batch: ChangeBatch) -> Self {
        self.steps.push(ScenarioStep::Relay { batch });
        self
    }

    pub fn advance_clock(mut self, secs: u64) -> Self {
        self.steps.push(ScenarioStep::AdvanceClock { secs });
        self
    }

    // ===== Assertions =====

    /// Add a custom assertion
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.steps.push(ScenarioStep::Assert { assertion });
        self
    }

    pub fn assert_thought_exists(self, value: &str) -> Self {
        self.assert(Assertion::ThoughtExists {
            value: value.to_string(),
        })
    }

    pub fn assert_thought_missing(self, value: &str) -> Self {
        self.assert(Assertion::ThoughtMissing {
            value: value.to_string(),
        })
    }

    pub fn assert_context_count(self, value: &str, count: usize) -> Self {
        self.assert(Assertion::ThoughtContextCount {
            value: value.to_string(),
            count,
        })
    }

    /// Assert the children of a context, in rank order
    pub fn assert_children(self, parents: &[&str], values: &[&str]) -> Self {
        self.assert(Assertion::ChildrenAre {
            parents: owned(parents),
            values: owned(values),
        })
    }

    pub fn assert_context_missing(self, parents: &[&str]) -> Self {
        self.assert(Assertion::ContextMissing {
            parents: owned(parents),
        })
    }

    /// Assert the search result values, in any order
    pub fn assert_search(self, query: &str, values: &[&str]) -> Self {
        self.assert(Assertion::SearchReturns {
            query: query.to_string(),
            values: owned(values),
        })
    }

    pub fn assert_mirror_has(self, tab: &str, value: &str) -> Self {
        self.assert(Assertion::MirrorHas {
            tab: tab.to_string(),
            value: value.to_string(),
        })
    }

    pub fn assert_mirror_lacks(self, tab: &str, value: &str) -> Self {
        self.assert(Assertion::MirrorLacks {
            tab: tab.to_string(),
            value: value.to_string(),
        })
    }

    pub fn assert_mirror_batches(self, tab: &str, count: usize) -> Self {
        self.assert(Assertion::MirrorBatches {
            tab: tab.to_string(),
            count,
        })
    }

    pub fn assert_failed_keys(self, values: &[&str]) -> Self {
        self.assert(Assertion::LastErrorFailedKeys {
            values: owned(values),
        })
    }

    pub fn assert_cursor(self, path: Option<&[&str]>) -> Self {
        self.assert(Assertion::CursorIs {
            path: path.map(owned),
        })
    }

    // ===== Execution =====

    /// Execute the scenario and return results
    pub fn run(self) -> ScenarioResult {
        let mut runner = match ScenarioRunner::new(self.config.clone()) {
            Ok(r) => r,
            Err(e) => {
                return ScenarioResult {
                    name: self.name.clone(),
                    success: false,
                    steps_executed: 0,
                    failure_step: Some(0),
                    error: Some(format!("Failed to create runner: {}", e)),
                }
            }
        };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                steps_executed: self.steps.len(),
                failure_step: None,
                error: None,
            },
            Err(e) => {
                let failure_step = runner.current_step();
                ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: failure_step,
                    failure_step: Some(failure_step),
                    error: Some(format!("{:?}", e)),
                }
            }
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Unwrap the result, panicking if it failed
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "Scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    /// Expect the result to be successful
    pub fn expect(self, msg: &str) {
        if !self.success {
            panic!(
                "{}: Scenario '{}' failed at step {}: {}",
                msg,
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}
