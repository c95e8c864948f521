//! Per-worker bounded output ring buffer with live subscribers (C3).

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::OutputLine;

const DEFAULT_CAPACITY: usize = 10_000;
const SUBSCRIBER_CAPACITY: usize = 2_048;

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerBufferStats {
    pub line_count: usize,
    pub total_lines: u64,
}

struct WorkerBuffer {
    lines: VecDeque<OutputLine>,
    next_line_number: u64,
    total_lines: u64,
    subscribers: HashMap<Uuid, flume::Sender<OutputLine>>,
    capacity: usize,
}

impl WorkerBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            next_line_number: 1,
            total_lines: 0,
            subscribers: HashMap::new(),
            capacity,
        }
    }
}

/// Per-worker bounded ring of [`OutputLine`]. Line numbers are strictly
/// monotonic per worker and reset only by an explicit [`OutputBuffer::clear`].
pub struct OutputBuffer {
    capacity: usize,
    workers: Mutex<HashMap<Uuid, WorkerBuffer>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn write(&self, worker_id: Uuid, text: impl Into<String>) -> OutputLine {
        let mut workers = self.workers.lock().await;
        let buf = workers
            .entry(worker_id)
            .or_insert_with(|| WorkerBuffer::new(self.capacity));

        let line = OutputLine {
            worker_id,
            line_number: buf.next_line_number,
            timestamp: Utc::now(),
            text: text.into(),
        };
        buf.next_line_number += 1;
        buf.total_lines += 1;

        buf.lines.push_back(line.clone());
        while buf.lines.len() > buf.capacity {
            buf.lines.pop_front();
        }

        buf.subscribers.retain(|_, tx| match tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                let _ = tx.try_recv();
                let _ = tx.try_send(line.clone());
                true
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        });

        line
    }

    /// Lines strictly greater than `since_line`, up to `limit`, from the
    /// tail if `since_line` is unset.
    pub async fn get_recent(
        &self,
        worker_id: Uuid,
        limit: usize,
        since_line: Option<u64>,
    ) -> Vec<OutputLine> {
        let workers = self.workers.lock().await;
        let Some(buf) = workers.get(&worker_id) else {
            return Vec::new();
        };
        match since_line {
            Some(since) => buf
                .lines
                .iter()
                .filter(|l| l.line_number > since)
                .take(limit)
                .cloned()
                .collect(),
            None => {
                let total = buf.lines.len();
                let skip = total.saturating_sub(limit);
                buf.lines.iter().skip(skip).cloned().collect()
            }
        }
    }

    pub async fn subscribe(&self, worker_id: Uuid, subscriber_id: Uuid) -> flume::Receiver<OutputLine> {
        let mut workers = self.workers.lock().await;
        let buf = workers
            .entry(worker_id)
            .or_insert_with(|| WorkerBuffer::new(self.capacity));
        let (tx, rx) = flume::bounded(SUBSCRIBER_CAPACITY);
        buf.subscribers.insert(subscriber_id, tx);
        rx
    }

    pub async fn unsubscribe(&self, worker_id: Uuid, subscriber_id: Uuid) {
        let mut workers = self.workers.lock().await;
        if let Some(buf) = workers.get_mut(&worker_id) {
            buf.subscribers.remove(&subscriber_id);
        }
    }

    pub async fn clear(&self, worker_id: Uuid) {
        let mut workers = self.workers.lock().await;
        workers.insert(worker_id, WorkerBuffer::new(self.capacity));
    }

    pub async fn stats(&self) -> HashMap<Uuid, WorkerBufferStats> {
        let workers = self.workers.lock().await;
        workers
            .iter()
            .map(|(id, buf)| {
                (
                    *id,
                    WorkerBufferStats {
                        line_count: buf.lines.len(),
                        total_lines: buf.total_lines,
                    },
                )
            })
            .collect()
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn line_numbers_strictly_increase() {
        let buf = OutputBuffer::new();
        let worker = Uuid::new_v4();
        let l1 = buf.write(worker, "one").await;
        let l2 = buf.write(worker, "two").await;
        assert_eq!(l1.line_number, 1);
        assert_eq!(l2.line_number, 2);
    }

    #[tokio::test]
    async fn get_recent_respects_since_line_and_limit() {
        let buf = OutputBuffer::new();
        let worker = Uuid::new_v4();
        for i in 0..10 {
            buf.write(worker, format!("line-{i}")).await;
        }
        let recent = buf.get_recent(worker, 3, Some(5)).await;
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|l| l.line_number > 5));
    }

    #[tokio::test]
    async fn clear_resets_line_numbers() {
        let buf = OutputBuffer::new();
        let worker = Uuid::new_v4();
        buf.write(worker, "one").await;
        buf.clear(worker).await;
        let l = buf.write(worker, "again").await;
        assert_eq!(l.line_number, 1);
    }

    #[tokio::test]
    async fn ring_bounds_memory() {
        let buf = OutputBuffer::with_capacity(5);
        let worker = Uuid::new_v4();
        for i in 0..20 {
            buf.write(worker, format!("line-{i}")).await;
        }
        let stats = buf.stats().await;
        assert_eq!(stats[&worker].line_count, 5);
        assert_eq!(stats[&worker].total_lines, 20);
    }
}
