//! Registry of in-flight workers: handler threads and search subprocesses.
//!
//! Only the main loop touches the registry. Completion is observed by polling
//! in [`WorkerRegistry::reap`], never signalled by the worker itself.

use std::process::Child;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, warn};

pub(crate) enum WorkerHandle {
    InProcess(JoinHandle<()>),
    OutOfProcess { child: Child, argv: Vec<String> },
}

/// What a worker was started for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct WorkerSpec {
    pub(crate) command: String,
    pub(crate) channel: Option<String>,
    pub(crate) user: Option<String>,
    /// Set for the scheduled broadcast job, which has no requester.
    pub(crate) global: bool,
}

pub(crate) struct Worker {
    pub(crate) id: u64,
    pub(crate) spec: WorkerSpec,
    pub(crate) started_at: Instant,
    pub(crate) handle: WorkerHandle,
}

impl Worker {
    pub(crate) fn kind(&self) -> &'static str {
        match self.handle {
            WorkerHandle::InProcess(_) => "thread",
            WorkerHandle::OutOfProcess { .. } => "process",
        }
    }

    pub(crate) fn is_finished(&mut self) -> bool {
        match &mut self.handle {
            WorkerHandle::InProcess(handle) => handle.is_finished(),
            WorkerHandle::OutOfProcess { child, argv } => match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(worker = self.id, ?argv, %status, "subprocess exited");
                    true
                }
                Ok(None) => false,
                Err(err) => {
                    warn!(worker = self.id, error = %err, "cannot poll subprocess; dropping it");
                    true
                }
            },
        }
    }
}

/// Admission test: strictly below the ceiling, so it is never exceeded.
pub(crate) fn admit(live: usize, max_parallel: usize) -> bool {
    live < max_parallel
}

pub(crate) struct WorkerRegistry {
    workers: Vec<Worker>,
    next_id: u64,
    max_parallel: usize,
    last_reported: usize,
}

impl WorkerRegistry {
    pub(crate) fn new(max_parallel: usize) -> Self {
        Self {
            workers: Vec::new(),
            next_id: 1,
            max_parallel,
            last_reported: 0,
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub(crate) fn has_capacity(&self) -> bool {
        admit(self.live_count(), self.max_parallel)
    }

    /// Reserve an id before spawning so the worker can log under it.
    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn register(&mut self, id: u64, spec: WorkerSpec, handle: WorkerHandle) {
        let worker = Worker {
            id,
            spec,
            started_at: Instant::now(),
            handle,
        };
        debug!(
            worker = worker.id,
            kind = worker.kind(),
            global = worker.spec.global,
            command = %worker.spec.command,
            "worker registered"
        );
        self.workers.push(worker);
    }

    pub(crate) fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Remove every finished worker; returns how many were removed.
    pub(crate) fn reap(&mut self) -> usize {
        let before = self.workers.len();
        let mut live = Vec::with_capacity(before);
        for mut worker in std::mem::take(&mut self.workers) {
            if !worker.is_finished() {
                live.push(worker);
                continue;
            }
            let elapsed = worker.started_at.elapsed();
            if let WorkerHandle::InProcess(handle) = worker.handle {
                // Already finished, so join returns immediately.
                if handle.join().is_err() {
                    warn!(worker = worker.id, "worker thread panicked");
                }
            }
            debug!(worker = worker.id, ?elapsed, "worker reaped");
        }
        self.workers = live;

        let total = self.workers.len();
        if total != self.last_reported {
            debug!(live = total, max = self.max_parallel, "live worker count changed");
            self.last_reported = total;
        }
        before - total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn blocked_thread() -> (JoinHandle<()>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _ = rx.recv();
        });
        (handle, tx)
    }

    fn reap_until_empty(registry: &mut WorkerRegistry) {
        for _ in 0..200 {
            registry.reap();
            if registry.live_count() == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("workers did not finish");
    }

    #[test]
    fn admission_is_strict() {
        assert!(admit(0, 1));
        assert!(admit(1, 2));
        assert!(!admit(2, 2));
        assert!(!admit(3, 2));
        assert!(!admit(0, 0));
    }

    #[test]
    fn ceiling_refuses_third_worker() {
        let mut registry = WorkerRegistry::new(2);
        let mut releases = Vec::new();
        let mut admitted = 0;
        for i in 0..3 {
            if !registry.has_capacity() {
                continue;
            }
            let (handle, tx) = blocked_thread();
            releases.push(tx);
            let id = registry.allocate_id();
            registry.register(
                id,
                WorkerSpec {
                    command: format!("plot #{i}"),
                    ..WorkerSpec::default()
                },
                WorkerHandle::InProcess(handle),
            );
            admitted += 1;
        }
        assert_eq!(admitted, 2);
        assert_eq!(registry.live_count(), 2);
        assert!(!registry.has_capacity());

        drop(releases);
        reap_until_empty(&mut registry);
        assert!(registry.has_capacity());
    }

    #[test]
    fn reap_is_idempotent() {
        let mut registry = WorkerRegistry::new(4);
        let (running, _keep) = blocked_thread();
        let done = thread::spawn(|| {});
        while !done.is_finished() {
            thread::sleep(Duration::from_millis(5));
        }

        let a = registry.allocate_id();
        registry.register(a, WorkerSpec::default(), WorkerHandle::InProcess(running));
        let b = registry.allocate_id();
        registry.register(b, WorkerSpec::default(), WorkerHandle::InProcess(done));

        assert_eq!(registry.reap(), 1);
        let ids: Vec<u64> = registry.workers().iter().map(|w| w.id).collect();
        assert_eq!(registry.reap(), 0);
        let again: Vec<u64> = registry.workers().iter().map(|w| w.id).collect();
        assert_eq!(ids, again);
        assert_eq!(ids, vec![a]);
    }

    #[test]
    fn panicking_thread_is_still_reaped() {
        let mut registry = WorkerRegistry::new(1);
        let handle = thread::spawn(|| panic!("boom"));
        let id = registry.allocate_id();
        registry.register(id, WorkerSpec::default(), WorkerHandle::InProcess(handle));
        reap_until_empty(&mut registry);
    }

    #[cfg(unix)]
    #[test]
    fn exited_subprocess_is_reaped() {
        let mut registry = WorkerRegistry::new(1);
        let argv = vec!["true".to_string()];
        let child = crate::build_external_command("true", &[]).spawn().unwrap();
        let id = registry.allocate_id();
        registry.register(
            id,
            WorkerSpec {
                command: "nblast #1".into(),
                ..WorkerSpec::default()
            },
            WorkerHandle::OutOfProcess { child, argv },
        );
        assert_eq!(registry.workers()[0].kind(), "process");
        reap_until_empty(&mut registry);
    }

    #[test]
    fn ids_are_unique() {
        let mut registry = WorkerRegistry::new(1);
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert_ne!(a, b);
    }
}
