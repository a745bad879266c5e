//! Process metrics sampling.
//!
//! CPU utilisation is only meaningful as a rate, so [`SystemSampler`] takes
//! two readings separated by the configured interval. Memory, thread, and
//! connection counts come from the second reading. Counts the platform does
//! not expose are left as `None` rather than guessed.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use niobe_core::{MetricSample, ProcessStatus};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::procnet;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("process {0} not found")]
    ProcessNotFound(u32),
}

pub trait Sampler: Send + Sync {
    fn sample(&self, pid: u32) -> impl Future<Output = Result<MetricSample, SampleError>> + Send;

    /// The process bound to local `port`, if any.
    fn resolve_port(&self, port: u16) -> impl Future<Output = Option<u32>> + Send;
}

/// Samples live processes through `sysinfo`.
#[derive(Debug, Clone)]
pub struct SystemSampler {
    interval: Duration,
}

impl SystemSampler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Sampler for SystemSampler {
    async fn sample(&self, pid: u32) -> Result<MetricSample, SampleError> {
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        let refresh = || ProcessRefreshKind::everything();

        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh());
        if system.process(target).is_none() {
            return Err(SampleError::ProcessNotFound(pid));
        }

        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[target]),
                true,
                refresh(),
            );
        }

        let process = system
            .process(target)
            .ok_or(SampleError::ProcessNotFound(pid))?;
        let status = map_status(process.status());
        if status == ProcessStatus::Dead {
            return Err(SampleError::ProcessNotFound(pid));
        }

        let cpu_percent = if self.interval.is_zero() {
            0.0
        } else {
            f64::from(process.cpu_usage())
        };
        let thread_count = process
            .tasks()
            .map(|tasks| tasks.len() as u32)
            .filter(|n| *n > 0);

        let sample = MetricSample {
            pid,
            status,
            cpu_percent,
            memory_bytes: process.memory(),
            thread_count,
            connection_count: procnet::inet_connections(pid),
            captured_at: Utc::now(),
        };
        tracing::debug!(pid, cpu = sample.cpu_percent, rss = sample.memory_bytes, "sampled");
        Ok(sample)
    }

    async fn resolve_port(&self, port: u16) -> Option<u32> {
        let resolved = tokio::task::spawn_blocking(move || procnet::pid_for_port(port))
            .await
            .ok()
            .flatten();
        tracing::debug!(port, pid = ?resolved, "resolved port");
        resolved
    }
}

fn map_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    use sysinfo::ProcessStatus as S;
    match status {
        S::Run | S::Waking | S::Wakekill => ProcessStatus::Running,
        S::Sleep | S::Idle | S::UninterruptibleDiskSleep | S::Parked | S::LockBlocked => {
            ProcessStatus::Sleeping
        }
        S::Stop | S::Tracing => ProcessStatus::Stopped,
        S::Zombie => ProcessStatus::Zombie,
        S::Dead => ProcessStatus::Dead,
        _ => ProcessStatus::Unknown,
    }
}

/// Returns canned samples. Pids without an entry are reported as not found,
/// ports without an entry resolve to nothing.
#[derive(Debug, Clone, Default)]
pub struct FixedSampler {
    samples: HashMap<u32, MetricSample>,
    listeners: HashMap<u16, u32>,
}

impl FixedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sample: MetricSample) -> Self {
        self.samples.insert(sample.pid, sample);
        self
    }

    pub fn with_listener(mut self, port: u16, pid: u32) -> Self {
        self.listeners.insert(port, pid);
        self
    }
}

impl Sampler for FixedSampler {
    async fn sample(&self, pid: u32) -> Result<MetricSample, SampleError> {
        self.samples
            .get(&pid)
            .cloned()
            .ok_or(SampleError::ProcessNotFound(pid))
    }

    async fn resolve_port(&self, port: u16) -> Option<u32> {
        self.listeners.get(&port).copied()
    }
}
