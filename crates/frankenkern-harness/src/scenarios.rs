//! Lifecycle workload scenarios.
//!
//! Each scenario boots a fresh kernel, drives it through a workload shaped
//! after the subsystem's racy paths (fan-out joins, a join storm on one
//! handle, mass detach), and reports a set of named checks. The detach
//! scenario deliberately pins the subsystem's inherited leak: abandoned
//! handles keep their arena slots.

use std::sync::mpsc::channel;
use std::thread;
use std::time::{Duration, Instant};

use frankenkern_core::{Kernel, Pid, ThreadError, create_thread, detach, join};

use crate::structured_log::{LogEntry, LogLevel, Outcome};

const TIMEOUT: Duration = Duration::from_secs(10);

/// One named assertion inside a scenario.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Result of a full scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: String,
    pub checks: Vec<CheckResult>,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.passed() {
            Outcome::Pass
        } else {
            Outcome::Fail
        }
    }

    /// Renders the report as JSONL entries: one per check plus a summary.
    #[must_use]
    pub fn to_log_entries(&self) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(self.checks.len() + 1);
        for check in &self.checks {
            let mut entry = LogEntry::new(
                if check.passed {
                    LogLevel::Info
                } else {
                    LogLevel::Error
                },
                "scenario_check",
            );
            entry.scenario = Some(self.scenario.clone());
            entry.check = Some(check.name.clone());
            entry.outcome = Some(if check.passed {
                Outcome::Pass
            } else {
                Outcome::Fail
            });
            entry.detail = Some(check.detail.clone());
            entries.push(entry);
        }
        let mut summary = LogEntry::new(LogLevel::Info, "scenario_done");
        summary.scenario = Some(self.scenario.clone());
        summary.outcome = Some(self.outcome());
        entries.push(summary);
        entries
    }
}

fn check(name: &str, passed: bool, detail: impl Into<String>) -> CheckResult {
    CheckResult {
        name: name.into(),
        passed,
        detail: detail.into(),
    }
}

/// Polls `cond` until it holds or the scenario timeout elapses.
fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Fan-out: `processes` processes, each spawning `workers` threads and
/// joining them all; every process is then reaped.
#[must_use]
pub fn spawn_tree(processes: usize, workers: usize) -> ScenarioReport {
    let kernel = Kernel::new();
    let (sum_tx, sum_rx) = channel();

    for _ in 0..processes {
        let tx = sum_tx.clone();
        kernel.exec(
            Box::new(move |_| {
                let mut handles = Vec::new();
                for w in 0..workers {
                    handles.push(create_thread(
                        Some(Box::new(move |_| (w as i32) * 3)),
                        &[],
                    ));
                }
                let total: i32 = handles
                    .into_iter()
                    .map(|h| join(h).unwrap_or(i32::MIN))
                    .sum();
                tx.send(total).unwrap();
                total
            }),
            &[],
        );
    }
    drop(sum_tx);

    let expected: i32 = (0..workers as i32).map(|w| w * 3).sum();
    let mut sums_ok = true;
    let mut seen = 0usize;
    for _ in 0..processes {
        match sum_rx.recv_timeout(TIMEOUT) {
            Ok(total) => {
                sums_ok &= total == expected;
                seen += 1;
            }
            Err(_) => break,
        }
    }

    let mut reaped = 0usize;
    while kernel.wait_child(Pid::INIT).is_some() {
        reaped += 1;
    }

    let leaked = kernel.live_handle_slots();
    ScenarioReport {
        scenario: "spawn-tree".into(),
        checks: vec![
            check(
                "every worker sum collected",
                sums_ok && seen == processes,
                format!("{seen}/{processes} processes reported, expected sum {expected}"),
            ),
            check(
                "every process reaped",
                reaped == processes,
                format!("{reaped}/{processes} reaped"),
            ),
            check(
                "only primary slots leak",
                leaked == processes,
                format!("{leaked} occupied slots for {processes} drained primaries"),
            ),
        ],
    }
}

/// Join storm: many joiners block on one worker; all must wake with the
/// identical exit value, and exactly one reclaims the handle.
#[must_use]
pub fn join_storm(joiners: usize) -> ScenarioReport {
    let kernel = Kernel::new();
    let (gate_tx, gate_rx) = channel::<()>();
    let (id_tx, id_rx) = channel();
    let (result_tx, result_rx) = channel();

    let pid = kernel.exec(
        Box::new(move |_| {
            let worker = create_thread(
                Some(Box::new(move |_| {
                    gate_rx.recv().ok();
                    1234
                })),
                &[],
            );
            id_tx.send(worker).unwrap();
            let mut storm = Vec::new();
            for _ in 0..joiners {
                let tx = result_tx.clone();
                storm.push(create_thread(
                    Some(Box::new(move |_| {
                        tx.send(join(worker)).unwrap();
                        0
                    })),
                    &[],
                ));
            }
            for j in storm {
                join(j).ok();
            }
            0
        }),
        &[],
    );

    let worker = match id_rx.recv_timeout(TIMEOUT) {
        Ok(worker) => worker,
        Err(_) => {
            return ScenarioReport {
                scenario: "join-storm".into(),
                checks: vec![check("worker spawned", false, "no handle reported")],
            };
        }
    };

    let all_blocked = eventually(|| {
        kernel
            .thread_snapshot(worker)
            .is_some_and(|s| s.waiter_count as usize == joiners)
    });
    gate_tx.send(()).ok();

    let mut identical = true;
    let mut woken = 0usize;
    for _ in 0..joiners {
        match result_rx.recv_timeout(TIMEOUT) {
            Ok(result) => {
                identical &= result == Ok(1234);
                woken += 1;
            }
            Err(_) => break,
        }
    }

    let zombie = kernel.wait_for_zombie(pid);
    let reclaimed = kernel.thread_snapshot(worker).is_none();
    let leaked = kernel.live_handle_slots();
    kernel.wait_child(Pid::INIT);

    ScenarioReport {
        scenario: "join-storm".into(),
        checks: vec![
            check(
                "every joiner blocked before the exit",
                all_blocked,
                format!("{joiners} waiters registered"),
            ),
            check(
                "identical exit values",
                identical && woken == joiners,
                format!("{woken}/{joiners} woken with 1234"),
            ),
            check("process went zombie", zombie, "last exit drove the cascade"),
            check(
                "exactly one joiner reclaimed the handle",
                reclaimed,
                "worker slot freed",
            ),
            check(
                "only the primary slot leaks",
                leaked == 1,
                format!("{leaked} occupied slots"),
            ),
        ],
    }
}

/// Mass detach: every detached handle refuses further detach/join, and its
/// arena slot survives the process teardown (the inherited leak, pinned at
/// workload scale).
#[must_use]
pub fn detach_leak(threads: usize) -> ScenarioReport {
    let kernel = Kernel::new();
    let probe = kernel.clone();
    let (report_tx, report_rx) = channel();

    let pid = kernel.exec(
        Box::new(move |_| {
            let mut protocol_ok = true;
            let mut ids = Vec::new();
            let mut gates = Vec::new();
            for _ in 0..threads {
                // Gate each worker so the detach cannot race its exit.
                let (gate_tx, gate_rx) = channel::<()>();
                let h = create_thread(
                    Some(Box::new(move |_| {
                        gate_rx.recv().ok();
                        0
                    })),
                    &[],
                );
                protocol_ok &= detach(h).is_ok();
                protocol_ok &= matches!(detach(h), Err(ThreadError::AlreadyDetached));
                protocol_ok &= matches!(join(h), Err(ThreadError::AlreadyDetached));
                ids.push(h);
                gates.push(gate_tx);
            }
            drop(gates);
            for h in &ids {
                while !probe.thread_snapshot(*h).is_some_and(|s| s.exited) {
                    thread::yield_now();
                }
            }
            report_tx.send(protocol_ok).unwrap();
            0
        }),
        &[],
    );

    let protocol_ok = report_rx.recv_timeout(TIMEOUT).unwrap_or(false);
    let zombie = kernel.wait_for_zombie(pid);
    let leaked = kernel.live_handle_slots();
    kernel.wait_child(Pid::INIT);

    ScenarioReport {
        scenario: "detach-leak".into(),
        checks: vec![
            check(
                "detach succeeds exactly once per handle",
                protocol_ok,
                format!("{threads} handles detached"),
            ),
            check("process went zombie", zombie, "last exit drove the cascade"),
            check(
                "abandoned slots survive the teardown",
                leaked == threads + 1,
                format!("{leaked} occupied slots for {threads} detached workers + primary"),
            ),
        ],
    }
}
