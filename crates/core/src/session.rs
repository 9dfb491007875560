use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

pub const DEFAULT_RETAINED_TURNS: usize = 10;

/// One resolved question/answer exchange. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub raw_query: String,
    pub resolved_query: String,
    /// Dimension -> value filters in effect for this turn. Later follow-up
    /// turns inherit keys they do not override.
    pub extracted_filters: BTreeMap<String, String>,
    pub resolved_sql: Option<String>,
    pub row_count: Option<usize>,
    pub success: bool,
    pub is_followup: bool,
    pub timestamp: DateTime<Utc>,
}

/// Consistent view of a session taken at request start. The generation value
/// must be presented back on commit so writes racing a clear are detected.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub recent_turns: Vec<Turn>,
}

#[derive(Debug, Default)]
struct SessionSlot {
    generation: u64,
    closed: bool,
    turns: VecDeque<Turn>,
}

/// Keyed conversational memory with bounded FIFO history.
///
/// Operations on one session key serialize on that key's lock; different keys
/// proceed fully in parallel. A clear bumps the slot's generation counter, so
/// a turn committed by a request that began before the clear is dropped
/// instead of resurrecting state into the cleared session.
#[derive(Debug)]
pub struct SessionStore {
    max_turns: usize,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionSlot>>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_TURNS)
    }
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self { max_turns: max_turns.max(1), sessions: RwLock::new(HashMap::new()) }
    }

    async fn slot(&self, session_id: &str) -> Option<Arc<Mutex<SessionSlot>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn slot_or_create(&self, session_id: &str) -> Arc<Mutex<SessionSlot>> {
        if let Some(slot) = self.slot(session_id).await {
            return slot;
        }
        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id.to_string()).or_default().clone()
    }

    /// All retained turns, oldest first. Absent and cleared sessions read the
    /// same: `None`.
    pub async fn get(&self, session_id: &str) -> Option<Vec<Turn>> {
        let slot = self.slot(session_id).await?;
        let slot = slot.lock().await;
        if slot.closed && slot.turns.is_empty() {
            return None;
        }
        Some(slot.turns.iter().cloned().collect())
    }

    /// Up to `n` most recent turns, oldest first.
    pub async fn last_n(&self, session_id: &str, n: usize) -> Vec<Turn> {
        if n == 0 {
            return Vec::new();
        }
        let Some(slot) = self.slot(session_id).await else {
            return Vec::new();
        };
        let slot = slot.lock().await;
        let skip = slot.turns.len().saturating_sub(n);
        slot.turns.iter().skip(skip).cloned().collect()
    }

    /// Snapshot the session for one request: current generation plus the `n`
    /// most recent turns. Creates nothing; absent sessions snapshot at the
    /// generation they would be lazily created with.
    pub async fn begin(&self, session_id: &str, n: usize) -> SessionSnapshot {
        let Some(slot) = self.slot(session_id).await else {
            return SessionSnapshot::default();
        };
        let slot = slot.lock().await;
        let skip = if n == 0 { slot.turns.len() } else { slot.turns.len().saturating_sub(n) };
        SessionSnapshot {
            generation: slot.generation,
            recent_turns: slot.turns.iter().skip(skip).cloned().collect(),
        }
    }

    /// Append unconditionally, creating the session lazily. Evicts the oldest
    /// turn once the retention cap is reached.
    pub async fn append_turn(&self, session_id: &str, turn: Turn) {
        let slot = self.slot_or_create(session_id).await;
        let mut slot = slot.lock().await;
        push_bounded(&mut slot, turn, self.max_turns);
    }

    /// Append only if the session generation still matches the snapshot taken
    /// at request start. Returns whether the write landed; a `false` return
    /// means a clear happened mid-flight and the turn was discarded.
    pub async fn commit_turn(&self, session_id: &str, generation: u64, turn: Turn) -> bool {
        let slot = self.slot_or_create(session_id).await;
        let mut slot = slot.lock().await;
        if slot.generation != generation {
            return false;
        }
        push_bounded(&mut slot, turn, self.max_turns);
        true
    }

    /// Discard all turns and invalidate outstanding snapshots. Idempotent:
    /// clearing an absent or already-cleared session is a no-op from the
    /// caller's perspective, though the generation still advances so that
    /// in-flight writes against the old state are dropped.
    pub async fn clear(&self, session_id: &str) {
        let slot = self.slot_or_create(session_id).await;
        let mut slot = slot.lock().await;
        slot.generation += 1;
        slot.closed = true;
        slot.turns.clear();
    }
}

fn push_bounded(slot: &mut SessionSlot, turn: Turn, max_turns: usize) {
    slot.closed = false;
    slot.turns.push_back(turn);
    while slot.turns.len() > max_turns {
        slot.turns.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;

    use super::{SessionStore, Turn};

    pub(crate) fn turn(raw: &str) -> Turn {
        Turn {
            raw_query: raw.to_string(),
            resolved_query: raw.to_string(),
            extracted_filters: BTreeMap::new(),
            resolved_sql: None,
            row_count: None,
            success: true,
            is_followup: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_creates_session_lazily_and_preserves_order() {
        let store = SessionStore::default();
        assert!(store.get("s1").await.is_none());

        store.append_turn("s1", turn("first")).await;
        store.append_turn("s1", turn("second")).await;

        let turns = store.get("s1").await.expect("session exists");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].raw_query, "first");
        assert_eq!(turns[1].raw_query, "second");
    }

    #[tokio::test]
    async fn retention_cap_evicts_oldest_first() {
        let store = SessionStore::new(3);
        for i in 0..5 {
            store.append_turn("s1", turn(&format!("q{i}"))).await;
        }
        let turns = store.get("s1").await.expect("session exists");
        assert_eq!(
            turns.iter().map(|t| t.raw_query.as_str()).collect::<Vec<_>>(),
            vec!["q2", "q3", "q4"]
        );
    }

    #[tokio::test]
    async fn last_n_bounds() {
        let store = SessionStore::default();
        for i in 0..4 {
            store.append_turn("s1", turn(&format!("q{i}"))).await;
        }
        assert!(store.last_n("s1", 0).await.is_empty());
        assert_eq!(store.last_n("s1", 2).await.len(), 2);
        assert_eq!(store.last_n("s1", 2).await[0].raw_query, "q2");
        assert_eq!(store.last_n("s1", 99).await.len(), 4);
        assert!(store.last_n("absent", 5).await.is_empty());
    }

    #[tokio::test]
    async fn clear_is_idempotent_and_empties_history() {
        let store = SessionStore::default();
        store.clear("never-seen").await;
        store.append_turn("s1", turn("q")).await;
        store.clear("s1").await;
        store.clear("s1").await;
        assert!(store.get("s1").await.is_none());
        assert!(store.last_n("s1", 5).await.is_empty());
    }

    #[tokio::test]
    async fn stale_commit_after_clear_is_dropped() {
        let store = SessionStore::default();
        store.append_turn("s1", turn("before")).await;

        let snapshot = store.begin("s1", 5).await;
        assert_eq!(snapshot.recent_turns.len(), 1);

        store.clear("s1").await;

        let landed = store.commit_turn("s1", snapshot.generation, turn("in-flight")).await;
        assert!(!landed);
        assert!(store.get("s1").await.is_none());

        // A fresh request after the clear sees a brand-new session.
        let fresh = store.begin("s1", 5).await;
        assert!(fresh.recent_turns.is_empty());
        assert!(store.commit_turn("s1", fresh.generation, turn("after")).await);
        assert_eq!(store.get("s1").await.expect("reopened").len(), 1);
    }

    #[tokio::test]
    async fn commit_against_absent_session_creates_it() {
        let store = SessionStore::default();
        let snapshot = store.begin("new", 5).await;
        assert!(store.commit_turn("new", snapshot.generation, turn("q")).await);
        assert_eq!(store.get("new").await.expect("created").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_session_all_land() {
        let store = Arc::new(SessionStore::new(64));
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append_turn("shared", turn(&format!("q{i}"))).await;
            }));
        }
        for handle in handles {
            handle.await.expect("task completed");
        }
        assert_eq!(store.get("shared").await.expect("session exists").len(), 16);
    }
}
