//! Exclusive rewiring of a process group for the duration of one run.
//!
//! Acquiring a [`RewireSession`] stops the target group. From then on the
//! session records every connection it detaches, and [`RewireSession::release`]
//! puts the canvas back: stop, delete the scaffold, recreate the detached
//! connections, start. Release is best-effort; each failing step is logged
//! and collected in the returned [`Teardown`] while the remaining steps
//! still run.

use std::fmt;

use nifitest_core::canvas::Connection;
use nifitest_core::types::NodeId;
use nifitest_nifi::canvas::recreate_connection;
use nifitest_nifi::Canvas;

use crate::error::HarnessError;
use crate::scaffold;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Stopped,
    Scaffolded,
    Rewired,
    Running,
    Responded,
    TimedOut,
    HttpError,
    TearingDown,
    Restored,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "IDLE",
            RunPhase::Stopped => "STOPPED",
            RunPhase::Scaffolded => "SCAFFOLDED",
            RunPhase::Rewired => "REWIRED",
            RunPhase::Running => "RUNNING",
            RunPhase::Responded => "RESPONDED",
            RunPhase::TimedOut => "TIMED_OUT",
            RunPhase::HttpError => "HTTP_ERROR",
            RunPhase::TearingDown => "TEARING_DOWN",
            RunPhase::Restored => "RESTORED",
        }
    }

    /// Phase reached once the probe returned `result`.
    pub fn after_probe<T>(result: &Result<T, HarnessError>) -> Self {
        match result {
            Ok(_) => RunPhase::Responded,
            Err(HarnessError::RequestTimeout(_)) => RunPhase::TimedOut,
            Err(_) => RunPhase::HttpError,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`RewireSession::release`].
#[derive(Debug, Default)]
pub struct Teardown {
    /// Recreated connections, keyed by the id they had before deletion.
    pub restored: Vec<(NodeId, Connection)>,
    /// Detached connections that could not be recreated.
    pub unrestored: Vec<Connection>,
    /// Every teardown step that failed, in order.
    pub errors: Vec<HarnessError>,
    /// Phases the run went through, ending with `IDLE`.
    pub phases: Vec<RunPhase>,
}

impl Teardown {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.unrestored.is_empty()
    }

    /// The recreated connection that replaced `old_id`, if any.
    pub fn replacement(&self, old_id: &str) -> Option<&Connection> {
        self.restored
            .iter()
            .find(|(id, _)| id == old_id)
            .map(|(_, connection)| connection)
    }
}

/// Guard over a stopped process group being rewired for a test.
pub struct RewireSession<'a> {
    canvas: &'a dyn Canvas,
    base_id: NodeId,
    scaffold: String,
    removed: Vec<Connection>,
    phases: Vec<RunPhase>,
    released: bool,
}

impl<'a> RewireSession<'a> {
    /// Stop `base_id` and take over its wiring.
    ///
    /// Nothing needs undoing if this fails.
    pub async fn acquire(
        canvas: &'a dyn Canvas,
        base_id: &str,
        scaffold: &str,
    ) -> Result<RewireSession<'a>, HarnessError> {
        canvas.schedule_process_group(base_id, false).await?;
        tracing::debug!(base_id, scaffold, "Stopped process group for rewiring");
        Ok(Self {
            canvas,
            base_id: base_id.to_string(),
            scaffold: scaffold.to_string(),
            removed: Vec::new(),
            phases: vec![RunPhase::Idle, RunPhase::Stopped],
            released: false,
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::Idle)
    }

    pub fn phases(&self) -> &[RunPhase] {
        &self.phases
    }

    /// Connections detached so far.
    pub fn removed(&self) -> &[Connection] {
        &self.removed
    }

    pub fn enter(&mut self, phase: RunPhase) {
        tracing::debug!(scaffold = %self.scaffold, from = %self.phase(), to = %phase, "Run phase");
        self.phases.push(phase);
    }

    /// Purge and delete `connection`, remembering it for restoration.
    pub async fn detach(&mut self, connection: &Connection) -> Result<(), HarnessError> {
        tracing::debug!(
            connection_id = %connection.id,
            source = %connection.source.id,
            destination = %connection.destination.id,
            "Detaching connection"
        );
        self.canvas.delete_connection(connection, true).await?;
        self.removed.push(connection.clone());
        Ok(())
    }

    /// Restore the canvas and restart the group.
    pub async fn release(mut self) -> Teardown {
        self.released = true;
        self.enter(RunPhase::TearingDown);

        let mut teardown = Teardown::default();

        if let Err(err) = self.canvas.schedule_process_group(&self.base_id, false).await {
            record(&mut teardown, "stop process group", err.into());
        }

        if let Err(err) = scaffold::demolish(self.canvas, &self.base_id, &self.scaffold).await {
            record(&mut teardown, "delete scaffold", err);
        }

        for connection in std::mem::take(&mut self.removed) {
            match recreate_connection(self.canvas, &connection).await {
                Ok(recreated) => {
                    tracing::debug!(
                        old_id = %connection.id,
                        new_id = %recreated.id,
                        "Restored connection"
                    );
                    teardown.restored.push((connection.id.clone(), recreated));
                }
                Err(err) => {
                    record(&mut teardown, "recreate connection", err.into());
                    teardown.unrestored.push(connection);
                }
            }
        }

        if let Err(err) = self.canvas.schedule_process_group(&self.base_id, true).await {
            record(&mut teardown, "start process group", err.into());
        }

        self.enter(RunPhase::Restored);
        self.enter(RunPhase::Idle);
        teardown.phases = std::mem::take(&mut self.phases);
        teardown
    }
}

impl Drop for RewireSession<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::error!(
                base_id = %self.base_id,
                scaffold = %self.scaffold,
                detached = self.removed.len(),
                "Rewire session dropped without release; canvas left modified"
            );
        }
    }
}

fn record(teardown: &mut Teardown, step: &str, err: HarnessError) {
    tracing::error!(step, error = %err, "Teardown step failed");
    teardown.errors.push(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn probe_outcome_maps_to_phase() {
        let ok: Result<(), HarnessError> = Ok(());
        assert_eq!(RunPhase::after_probe(&ok), RunPhase::Responded);

        let timeout: Result<(), HarnessError> =
            Err(HarnessError::RequestTimeout(Duration::from_secs(1)));
        assert_eq!(RunPhase::after_probe(&timeout), RunPhase::TimedOut);

        let status: Result<(), HarnessError> = Err(HarnessError::UnexpectedStatus {
            status: 500,
            body: String::new(),
        });
        assert_eq!(RunPhase::after_probe(&status), RunPhase::HttpError);
    }

    #[test]
    fn phase_names_match_state_machine() {
        assert_eq!(RunPhase::TimedOut.to_string(), "TIMED_OUT");
        assert_eq!(RunPhase::TearingDown.to_string(), "TEARING_DOWN");
    }
}
