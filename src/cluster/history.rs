use crate::cluster::types::RaftEvent;
use std::collections::VecDeque;

/// Default number of events kept for the timeline
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Fixed-capacity ring of the most recent cluster events, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub struct EventHistory {
    events: VecDeque<RaftEvent>,
    capacity: usize,
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventHistory {
    /// A capacity of zero is bumped to one
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, evicting the oldest once full
    pub fn append(&mut self, event: RaftEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Replace the whole buffer; only the newest `capacity` events survive
    ///
    /// Returns whether the contents changed.
    pub fn replace_all(&mut self, events: impl IntoIterator<Item = RaftEvent>) -> bool {
        let mut incoming = VecDeque::with_capacity(self.capacity);
        for event in events {
            if incoming.len() == self.capacity {
                incoming.pop_front();
            }
            incoming.push_back(event);
        }
        if incoming == self.events {
            return false;
        }
        self.events = incoming;
        true
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RaftEvent> + '_ {
        self.events.iter()
    }

    pub fn latest(&self) -> Option<&RaftEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<RaftEvent> {
        self.events.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn event(seq: u64) -> RaftEvent {
        RaftEvent {
            timestamp: 1_700_000_000.0 + seq as f64,
            event_type: "log_append".to_string(),
            node_id: 1,
            term: 1,
            details: BTreeMap::from([("index".to_string(), serde_json::json!(seq))]),
        }
    }

    #[test]
    fn test_append_150_keeps_last_100_in_order() {
        let mut history = EventHistory::default();
        for seq in 0..150 {
            history.append(event(seq));
            assert!(history.len() <= DEFAULT_EVENT_CAPACITY);
        }

        assert_eq!(history.len(), 100);
        let seqs: Vec<u64> = history
            .iter()
            .map(|e| e.details["index"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, (50..150).collect::<Vec<_>>());
        assert_eq!(history.latest().unwrap().details["index"], 149);
    }

    #[test]
    fn test_replace_all_supersedes_buffer() {
        let mut history = EventHistory::with_capacity(3);
        history.append(event(1));
        history.append(event(2));

        assert!(history.replace_all(vec![event(10), event(11)]));
        assert_eq!(history.to_vec(), vec![event(10), event(11)]);
        assert!(!history.replace_all(vec![event(10), event(11)]));

        assert!(history.replace_all((20..25).map(event)));
        assert_eq!(history.to_vec(), vec![event(22), event(23), event(24)]);
        // Only the retained tail is compared.
        assert!(!history.replace_all((21..25).map(event)));

        history.replace_all(Vec::new());
        assert!(history.is_empty());
    }

    #[test]
    fn test_zero_capacity_still_holds_latest() {
        let mut history = EventHistory::with_capacity(0);
        history.append(event(1));
        history.append(event(2));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.to_vec(), vec![event(2)]);
    }
}
