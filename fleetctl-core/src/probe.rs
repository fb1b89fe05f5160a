//! Worker probe: the external collaborator the dispatcher consults when a
//! slot's cached health entry goes stale.

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Up,
    Down,
}

/// A probe that failed to execute at all (as opposed to one that executed
/// and reported `Down`) — a timeout, a panic caught by the caller, a
/// transport error reaching the thing being probed.
#[derive(Debug, thiserror::Error)]
#[error("probe execution failed: {0}")]
pub struct ProbeError(pub String);

/// Synchronous health check for a worker slot, addressed by its display
/// name. Implementation-defined: a process status check, a ping, an HTTP
/// health endpoint. Execution failure is distinct from a `Down` result and
/// is signaled via `Err`; callers apply
/// [`crate::config::ProbeFailurePolicy`] to map it to an outcome.
pub trait WorkerProbe: Send + Sync {
    fn probe(&self, display_name: &str) -> Result<ProbeOutcome, ProbeError>;
}

/// Default probe for hosts with no external probe wired up yet, and for
/// tests: every slot always reports healthy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUpProbe;

impl WorkerProbe for AlwaysUpProbe {
    fn probe(&self, _display_name: &str) -> Result<ProbeOutcome, ProbeError> {
        Ok(ProbeOutcome::Up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_up_probe_reports_up() {
        let probe = AlwaysUpProbe;
        assert_eq!(probe.probe("slot-0").unwrap(), ProbeOutcome::Up);
    }
}
