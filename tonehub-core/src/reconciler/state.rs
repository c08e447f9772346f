use std::collections::HashMap;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonehub_model::{Source, SourceId};

use crate::events::Generation;

/// Where a source's pipeline currently is.
#[derive(Debug)]
pub(crate) enum SlotPhase {
    Idle {
        last_completed: Option<Instant>,
    },
    Running {
        generation: Generation,
        token: CancellationToken,
        task: JoinHandle<()>,
    },
}

/// Per-source state owned by the reconciliation loop.
#[derive(Debug)]
pub(crate) struct SourceSlot {
    pub source: Source,
    pub phase: SlotPhase,
    /// Start a fresh pass as soon as the current one reports back.
    pub pending_restart: bool,
}

impl SourceSlot {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            phase: SlotPhase::Idle {
                last_completed: None,
            },
            pending_restart: false,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, SlotPhase::Running { .. })
    }

    pub fn running_generation(&self) -> Option<Generation> {
        match &self.phase {
            SlotPhase::Running { generation, .. } => Some(*generation),
            SlotPhase::Idle { .. } => None,
        }
    }

    /// Cancel the running pass, if any. The slot stays `Running` until the
    /// pass reports back.
    pub fn cancel(&self) {
        if let SlotPhase::Running { token, .. } = &self.phase {
            token.cancel();
        }
    }

    /// Idle and either never scanned or last finished at least `due_after` ago.
    pub fn is_due(&self, now: Instant, due_after: std::time::Duration) -> bool {
        match self.phase {
            SlotPhase::Idle { last_completed } => last_completed
                .is_none_or(|finished| now.saturating_duration_since(finished) >= due_after),
            SlotPhase::Running { .. } => false,
        }
    }

    /// Move to `Idle`, handing back the finished pass task.
    pub fn finish(&mut self, now: Instant) -> Option<JoinHandle<()>> {
        let previous = std::mem::replace(
            &mut self.phase,
            SlotPhase::Idle {
                last_completed: Some(now),
            },
        );
        match previous {
            SlotPhase::Running { task, .. } => Some(task),
            SlotPhase::Idle { .. } => None,
        }
    }

    /// Take the running task out for draining, cancelling it first.
    pub fn retire(self) -> Option<JoinHandle<()>> {
        match self.phase {
            SlotPhase::Running { token, task, .. } => {
                token.cancel();
                Some(task)
            }
            SlotPhase::Idle { .. } => None,
        }
    }
}

/// Finished or cancelled pass tasks not yet awaited, at most one per source.
/// The next pass of a source awaits its predecessor before it starts.
#[derive(Debug, Default)]
pub(crate) struct DrainingPasses {
    tasks: HashMap<SourceId, JoinHandle<()>>,
}

impl DrainingPasses {
    pub fn park(&mut self, source: SourceId, task: JoinHandle<()>) {
        self.tasks.insert(source, task);
    }

    pub fn take(&mut self, source: SourceId) -> Option<JoinHandle<()>> {
        self.tasks.remove(&source)
    }

    /// Let go of the task of a source that no longer has a slot. Dropping
    /// the handle detaches the task; it has already reported back.
    pub fn forget(&mut self, source: SourceId) {
        self.tasks.remove(&source);
    }

    /// Drop handles of tasks that have run to completion.
    pub fn prune(&mut self) {
        self.tasks.retain(|_, task| !task.is_finished());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = JoinHandle<()>> + '_ {
        self.tasks.drain().map(|(_, task)| task)
    }
}
