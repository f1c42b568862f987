use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use inbound_id::ExecutableId;
use inbound_types::Activity;

/// Bounded per-executable activity history.
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    entries: RwLock<HashMap<ExecutableId, VecDeque<Activity>>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn push(&self, id: ExecutableId, activity: Activity) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let log = entries.entry(id).or_default();
        while log.len() >= self.capacity {
            log.pop_front();
        }
        log.push_back(activity);
    }

    /// Oldest first.
    pub fn recent(&self, id: &ExecutableId) -> Vec<Activity> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, id: &ExecutableId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inbound_types::Severity;

    #[test]
    fn keeps_only_the_newest_entries() {
        let log = ActivityLog::new(2);
        let id = ExecutableId::from_dedup_id("x");
        for msg in ["one", "two", "three"] {
            log.push(id, Activity::lifecycle(Severity::Info, msg));
        }
        let recent: Vec<_> = log.recent(&id).into_iter().map(|a| a.message).collect();
        assert_eq!(recent, vec!["two", "three"]);
        log.remove(&id);
        assert!(log.recent(&id).is_empty());
    }
}
