//! Scripted driver for tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{BatchContext, Driver, PluginReturn};
use crate::config::Config;
use crate::error::{Error, Phase, PluginError, Result};
use crate::resource::ResourceHandle;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Which identifiers `collect` reports
#[derive(Clone, Debug)]
pub(crate) enum DoneRule {
    /// Every record's completion key (uid, else content)
    All,
    /// Every record's content
    Contents,
    /// Only these identifiers, when present in the batch
    Only(Vec<String>),
}

/// Pauses `handle` until released
#[derive(Default)]
pub(crate) struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct ScriptState {
    current: Option<BatchContext>,
    batches: Vec<BatchContext>,
    resource_generations: Vec<u64>,
}

pub(crate) struct ScriptedDriver {
    name: String,
    merge: bool,
    done: DoneRule,
    fail_at: Option<(Phase, usize)>,
    gate: Option<Arc<Gate>>,
    state: Mutex<ScriptState>,
}

impl ScriptedDriver {
    pub fn new(name: &str, merge: bool) -> Self {
        Self {
            name: name.to_string(),
            merge,
            done: DoneRule::All,
            fail_at: None,
            gate: None,
            state: Mutex::new(ScriptState::default()),
        }
    }

    pub fn reporting(mut self, done: DoneRule) -> Self {
        self.done = done;
        self
    }

    /// Fail `phase` on the batch with this zero-based index
    pub fn failing_at(mut self, phase: Phase, batch_index: usize) -> Self {
        self.fail_at = Some((phase, batch_index));
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Batches seen by `prepare`, in order
    pub fn batches(&self) -> Vec<BatchContext> {
        self.state.lock().unwrap().batches.clone()
    }

    /// Resource generation observed by each `prepare`
    pub fn resource_generations(&self) -> Vec<u64> {
        self.state.lock().unwrap().resource_generations.clone()
    }

    fn check(&self, phase: Phase) -> Result<()> {
        let index = self.state.lock().unwrap().batches.len().saturating_sub(1);
        match self.fail_at {
            Some((p, i)) if p == phase && i == index => Err(Error::Plugin(PluginError::new(
                &self.name,
                phase,
                format!("scripted failure on batch {}", i),
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_merge_batch(&self) -> bool {
        self.merge
    }

    async fn prepare(
        &self,
        resource: &ResourceHandle,
        batch: &BatchContext,
        _config: &Config,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.current = Some(batch.clone());
            state.batches.push(batch.clone());
            state.resource_generations.push(resource.generation());
        }
        self.check(Phase::Prepare)
    }

    async fn handle(&self) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.check(Phase::Handle)
    }

    async fn collect(&self) -> Result<PluginReturn> {
        self.check(Phase::Collect)?;
        let batch = self.state.lock().unwrap().current.take().unwrap();
        let done: Vec<String> = match &self.done {
            DoneRule::All => batch
                .records
                .iter()
                .map(|r| r.completion_key().to_string())
                .collect(),
            DoneRule::Contents => batch.records.iter().map(|r| r.content.clone()).collect(),
            DoneRule::Only(ids) => batch
                .records
                .iter()
                .filter(|r| {
                    ids.iter()
                        .any(|id| Some(id.as_str()) == r.uid.as_deref() || *id == r.content)
                })
                .map(|r| r.completion_key().to_string())
                .collect(),
        };
        let mut report = PluginReturn::done(done);
        report
            .extra
            .insert("batch_size".into(), batch.records.len().into());
        Ok(report)
    }
}
