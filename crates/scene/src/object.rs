use std::collections::{BTreeMap, BTreeSet};

use types::{Callable, ObjectId, Variant};

#[derive(Debug, Clone)]
pub struct TimerState {
    pub interval: f64,
    pub oneshot: bool,
    pub remaining: f64,
    pub running: bool,
    pub callback: Callable,
}

impl TimerState {
    pub fn new(interval: f64, oneshot: bool, callback: Callable) -> Self {
        Self { interval, oneshot, remaining: interval, running: true, callback }
    }

    /// Advances the timer; true when it fired.
    pub fn tick(&mut self, delta: f64) -> bool {
        if !self.running {
            return false;
        }
        self.remaining -= delta;
        if self.remaining > 0.0 {
            return false;
        }
        if self.oneshot {
            self.running = false;
        } else {
            self.remaining += self.interval.max(f64::EPSILON);
        }
        true
    }
}

/// One host object. Every object can sit in the tree; objects of non-node
/// classes simply never get a parent.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub class: String,
    pub name: String,
    pub parent: ObjectId,
    pub children: Vec<ObjectId>,
    pub properties: BTreeMap<String, Variant>,
    pub groups: BTreeSet<String>,
    pub connections: Vec<(String, Callable)>,
    pub user_signals: Vec<String>,
    pub timer: Option<TimerState>,
    pub queued_for_deletion: bool,
}

impl SceneObject {
    pub fn new(class: &str, name: &str, properties: BTreeMap<String, Variant>) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            parent: ObjectId::NULL,
            children: Vec::new(),
            properties,
            groups: BTreeSet::new(),
            connections: Vec::new(),
            user_signals: Vec::new(),
            timer: None,
            queued_for_deletion: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_timer_rearms() {
        let mut t = TimerState::new(0.5, false, Callable::guest(ObjectId(1), 0x1000));
        assert!(!t.tick(0.3));
        assert!(t.tick(0.3));
        assert!(t.running);
        assert!((t.remaining - 0.4).abs() < 1e-9);
    }

    #[test]
    fn oneshot_timer_stops() {
        let mut t = TimerState::new(0.1, true, Callable::guest(ObjectId(1), 0x1000));
        assert!(t.tick(0.2));
        assert!(!t.running);
        assert!(!t.tick(1.0));
    }
}
