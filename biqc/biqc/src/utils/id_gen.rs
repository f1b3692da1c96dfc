use std::collections::{BTreeMap, BTreeSet};

/// Collision-free id allocator.
///
/// One arena is threaded through the whole splitter pipeline. It is seeded
/// with every id already present in the incoming request, so generated ids
/// can never collide with caller-supplied ones, and explicit ids reserved
/// mid-pipeline stay off-limits for later allocations.
#[derive(Debug, Clone, Default)]
pub struct IdArena {
    used: BTreeSet<String>,
    counters: BTreeMap<String, usize>,
}

impl IdArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut arena = Self::new();
        for id in ids {
            arena.reserve(id);
        }
        arena
    }

    /// Marks an explicit id as taken. Returns false when it already was.
    pub fn reserve<S: Into<String>>(&mut self, id: S) -> bool {
        self.used.insert(id.into())
    }

    /// Allocates the next free `{prefix}_{n}`.
    pub fn make(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        loop {
            let candidate = format!("{prefix}_{counter}");
            *counter += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Next free sub-query id (`q_{n}`).
    pub fn query_id(&mut self) -> String {
        self.make("q")
    }

    /// Next free relocated-expression alias (`e_{n}`).
    pub fn expr_id(&mut self) -> String {
        self.make("e")
    }
}
