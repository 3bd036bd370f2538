// Network reachability predicate consulted before every request

use std::sync::atomic::{AtomicBool, Ordering};

pub trait Reachability: Send + Sync {
    fn is_accessible(&self) -> bool;
}

/// Always reports the network as reachable
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeOnline;

impl Reachability for AssumeOnline {
    fn is_accessible(&self) -> bool {
        true
    }
}

/// Reachability flipped by whoever monitors the network
#[derive(Debug)]
pub struct ReachabilityFlag {
    online: AtomicBool,
}

impl ReachabilityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Reachability for ReachabilityFlag {
    fn is_accessible(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
