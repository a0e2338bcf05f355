//! Per-execution ordered log streams with replay and live tail.
//!
//! Each execution owns a bounded replay buffer plus a broadcast channel.
//! Subscribers get the buffered tail first, then live lines until the
//! completion sentinel. Slow subscribers that fall behind the channel see
//! an overflow marker instead of silently missing lines.

use crate::constants;
use futures::stream::{self, Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum LogEvent {
    Line(String),
    Completed,
}

struct StreamState {
    buffer: VecDeque<String>,
    completed: bool,
    overflowed: bool,
    tx: broadcast::Sender<LogEvent>,
}

impl StreamState {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(constants::LOG_CHANNEL_CAPACITY);
        Self {
            buffer: VecDeque::with_capacity(constants::LOG_REPLAY_CAPACITY),
            completed: false,
            overflowed: false,
            tx,
        }
    }
}

/// A subscriber's view of one execution stream: the replayed tail plus a
/// live receiver (absent when the stream already completed).
pub struct LogSubscription {
    replay: Vec<String>,
    live: Option<broadcast::Receiver<LogEvent>>,
}

impl LogSubscription {
    /// Flattens the subscription into one finite line stream.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        let live = match self.live {
            Some(rx) => BroadcastStream::new(rx)
                .filter_map(|item| async move {
                    match item {
                        Ok(LogEvent::Line(line)) => Some(Some(line)),
                        Ok(LogEvent::Completed) => Some(None),
                        Err(BroadcastStreamRecvError::Lagged(n)) => {
                            Some(Some(format!("overflow dropped={n}")))
                        }
                    }
                })
                .take_while(|item| futures::future::ready(item.is_some()))
                .filter_map(futures::future::ready)
                .boxed(),
            None => stream::empty().boxed(),
        };
        stream::iter(self.replay).chain(live)
    }
}

/// Process-wide registry of execution log streams.
pub struct ExecutionLogService {
    streams: RwLock<HashMap<Uuid, Arc<Mutex<StreamState>>>>,
}

impl Default for ExecutionLogService {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLogService {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    async fn state_for(&self, execution_id: Uuid) -> Arc<Mutex<StreamState>> {
        {
            let streams = self.streams.read().await;
            if let Some(state) = streams.get(&execution_id) {
                return Arc::clone(state);
            }
        }
        let mut streams = self.streams.write().await;
        Arc::clone(
            streams
                .entry(execution_id)
                .or_insert_with(|| Arc::new(Mutex::new(StreamState::new()))),
        )
    }

    /// Appends a line. Writes to a completed stream are dropped. When the
    /// replay buffer is full the oldest line falls out and a single
    /// overflow marker records that it happened.
    pub async fn write(&self, execution_id: Uuid, line: impl Into<String>) {
        let line = line.into();
        let state = self.state_for(execution_id).await;
        let mut state = state.lock().await;
        if state.completed {
            debug!(execution_id = %execution_id, "Dropping write to completed log stream");
            return;
        }

        if state.buffer.len() >= constants::LOG_REPLAY_CAPACITY {
            state.buffer.pop_front();
            state.overflowed = true;
        }
        state.buffer.push_back(line.clone());
        // Send failures just mean nobody is subscribed yet.
        let _ = state.tx.send(LogEvent::Line(line));
    }

    /// Subscribes to an execution's stream. Late subscribers of a
    /// completed stream get the buffered tail and an immediately ending
    /// stream.
    pub async fn subscribe(&self, execution_id: Uuid) -> LogSubscription {
        let state = self.state_for(execution_id).await;
        let state = state.lock().await;
        let mut replay: Vec<String> = Vec::with_capacity(state.buffer.len() + 1);
        if state.overflowed {
            replay.push("overflow earlier lines dropped".to_string());
        }
        replay.extend(state.buffer.iter().cloned());
        LogSubscription {
            replay,
            live: if state.completed {
                None
            } else {
                Some(state.tx.subscribe())
            },
        }
    }

    /// Signals end-of-stream to all current and future subscribers.
    pub async fn complete(&self, execution_id: Uuid) {
        let state = self.state_for(execution_id).await;
        let mut state = state.lock().await;
        if state.completed {
            return;
        }
        state.completed = true;
        let _ = state.tx.send(LogEvent::Completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_replay_then_live_lines() {
        let service = ExecutionLogService::new();
        let id = Uuid::new_v4();

        service.write(id, "line-1").await;
        service.write(id, "line-2").await;

        let subscription = service.subscribe(id).await;
        service.write(id, "line-3").await;
        service.complete(id).await;

        let lines: Vec<String> = subscription.into_stream().collect().await;
        assert_eq!(lines, vec!["line-1", "line-2", "line-3"]);
    }

    #[tokio::test]
    async fn stream_ends_after_completion() {
        let service = ExecutionLogService::new();
        let id = Uuid::new_v4();

        service.write(id, "only line").await;
        service.complete(id).await;

        // Late subscriber: buffered tail then immediate end-of-stream.
        let lines: Vec<String> = service.subscribe(id).await.into_stream().collect().await;
        assert_eq!(lines, vec!["only line"]);
    }

    #[tokio::test]
    async fn writes_after_completion_are_dropped() {
        let service = ExecutionLogService::new();
        let id = Uuid::new_v4();

        service.write(id, "before").await;
        service.complete(id).await;
        service.write(id, "after").await;

        let lines: Vec<String> = service.subscribe(id).await.into_stream().collect().await;
        assert_eq!(lines, vec!["before"]);
    }

    #[tokio::test]
    async fn multiple_subscribers_see_the_same_ordered_lines() {
        let service = ExecutionLogService::new();
        let id = Uuid::new_v4();

        service.write(id, "a").await;
        let first = service.subscribe(id).await;
        service.write(id, "b").await;
        let second = service.subscribe(id).await;
        service.write(id, "c").await;
        service.complete(id).await;

        let first_lines: Vec<String> = first.into_stream().collect().await;
        let second_lines: Vec<String> = second.into_stream().collect().await;
        assert_eq!(first_lines, vec!["a", "b", "c"]);
        assert_eq!(second_lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn replay_buffer_overflow_is_marked() {
        let service = ExecutionLogService::new();
        let id = Uuid::new_v4();

        for i in 0..constants::LOG_REPLAY_CAPACITY + 10 {
            service.write(id, format!("line-{i}")).await;
        }
        service.complete(id).await;

        let lines: Vec<String> = service.subscribe(id).await.into_stream().collect().await;
        assert_eq!(lines[0], "overflow earlier lines dropped");
        assert_eq!(lines.len(), constants::LOG_REPLAY_CAPACITY + 1);
        assert_eq!(
            lines.last().unwrap(),
            &format!("line-{}", constants::LOG_REPLAY_CAPACITY + 9)
        );
    }

    #[tokio::test]
    async fn streams_are_isolated_per_execution() {
        let service = ExecutionLogService::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        service.write(a, "for-a").await;
        service.write(b, "for-b").await;
        service.complete(a).await;
        service.complete(b).await;

        let lines: Vec<String> = service.subscribe(a).await.into_stream().collect().await;
        assert_eq!(lines, vec!["for-a"]);
    }
}
