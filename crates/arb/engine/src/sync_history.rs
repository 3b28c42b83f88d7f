use crate::error::EngineError;
use std::{collections::VecDeque, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    max_message_count: u64,
    timestamp_ms: u64,
}

/// Sliding window over the message counts reported by consensus, one message lag wide.
#[derive(Debug, Clone)]
pub struct SyncHistory {
    entries: VecDeque<Entry>,
    msg_lag_ms: u64,
}

impl SyncHistory {
    pub fn new(msg_lag: Duration) -> Result<Self, EngineError> {
        let msg_lag_ms = u64::try_from(msg_lag.as_millis()).unwrap_or(u64::MAX);
        if msg_lag_ms == 0 {
            return Err(EngineError::ZeroMsgLag);
        }
        Ok(Self { entries: VecDeque::new(), msg_lag_ms })
    }

    /// Records a report and forgets every report older than one lag before it.
    pub fn add(&mut self, max_message_count: u64, timestamp_ms: u64) {
        self.entries.push_back(Entry { max_message_count, timestamp_ms });

        let cutoff = timestamp_ms.saturating_sub(self.msg_lag_ms);
        while self.entries.front().is_some_and(|entry| entry.timestamp_ms < cutoff) {
            self.entries.pop_front();
        }
    }

    /// The message count of the oldest report inside the window ending at `now_ms`, or zero.
    pub fn sync_target(&self, now_ms: u64) -> u64 {
        let window_start = now_ms.saturating_sub(self.msg_lag_ms);
        self.entries
            .iter()
            .find(|entry| entry.timestamp_ms >= window_start)
            .map_or(0, |entry| entry.max_message_count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
