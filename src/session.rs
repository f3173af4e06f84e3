use crate::dataset::TabularDataset;
use crate::graph::{ChartOutcome, ChartSpec};
use crate::selection::SelectionState;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Where a session is in the upload → select → chart flow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    NoDataset,
    DatasetLoaded,
    SelectionsPending,
    SelectionsComplete,
    ChartRendered,
}

/// Everything remembered for one browser session
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub dataset: Option<TabularDataset>,
    pub selection: SelectionState,
    pub phase: SessionPhase,
    pub last_chart: Option<ChartSpec>,
}

impl Session {
    /// Replaces the dataset and drops column choices the new one lacks
    ///
    /// # Returns
    /// * The names of the cleared column choices
    pub fn set_dataset(&mut self, dataset: TabularDataset) -> Vec<String> {
        let cleared = self.selection.retain_columns(&dataset);
        self.dataset = Some(dataset);
        self.last_chart = None;
        self.phase = SessionPhase::DatasetLoaded;
        cleared
    }

    pub fn set_selection(&mut self, selection: SelectionState) {
        self.selection = selection;
        if self.dataset.is_none() {
            return;
        }
        self.phase = if self.selection.is_complete() {
            SessionPhase::SelectionsComplete
        } else if self.selection.is_empty() {
            SessionPhase::DatasetLoaded
        } else {
            SessionPhase::SelectionsPending
        };
    }

    /// Records the result of a "Create Graph" press
    ///
    /// An untriggered or empty outcome leaves the previous chart and phase as they are.
    pub fn record_outcome(&mut self, outcome: &ChartOutcome) {
        if let ChartOutcome::Produced(spec) = outcome {
            self.last_chart = Some(spec.clone());
            self.phase = SessionPhase::ChartRendered;
        }
    }
}

/// Sessions left unused for this long are dropped
const SESSION_IDLE_LIMIT: Duration = Duration::from_secs(12 * 60 * 60);

/// Most sessions held at once; the least recently used one makes room
const MAX_SESSIONS: usize = 10_000;

#[derive(Debug)]
struct Slot {
    session: Session,
    last_seen: Instant,
}

/// Per-session storage of the current dataset and selection
///
/// Each browser session is keyed by its own id, so two users never see each
/// other's uploads. Within a session exactly one dataset is kept; a new
/// upload replaces it. Only ids handed out by [`SessionStore::create_session`]
/// are ever stored: lookups of unknown ids read as an empty session and
/// writes to them are dropped.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Slot>>,
    idle_limit: Duration,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(SESSION_IDLE_LIMIT, MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that expires sessions idle for `idle_limit` and holds at most `capacity`
    pub fn with_limits(idle_limit: Duration, capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_limit,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an empty session and returns its id
    ///
    /// Expired sessions are dropped first. When the store is still full the
    /// least recently used session is evicted.
    pub fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut sessions = self.lock();

        let before = sessions.len();
        sessions.retain(|_, slot| now.duration_since(slot.last_seen) < self.idle_limit);
        if sessions.len() >= self.capacity {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, slot)| slot.last_seen)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
            }
        }
        let dropped = before - sessions.len();

        sessions.insert(
            id.clone(),
            Slot {
                session: Session::default(),
                last_seen: now,
            },
        );
        debug!(
            "Created session {} ({} active, {} dropped)",
            id,
            sessions.len(),
            dropped
        );
        id
    }

    /// Marks the session as in use
    ///
    /// # Returns
    /// * `false` if the id is unknown or has been idle too long; an idle
    ///   session is removed
    pub fn touch(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut sessions = self.lock();

        let Some(slot) = sessions.get_mut(id) else {
            return false;
        };
        if now.duration_since(slot.last_seen) < self.idle_limit {
            slot.last_seen = now;
            return true;
        }

        sessions.remove(id);
        debug!("Session {} expired", id);
        false
    }

    fn read<R>(&self, id: &str, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.lock().get(id).map(|slot| f(&slot.session))
    }

    /// Runs `f` on the session with `id`, or returns `None` if there is no such session
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.lock().get_mut(id).map(|slot| f(&mut slot.session))
    }

    /// Stores `dataset` as the session's current dataset
    ///
    /// # Returns
    /// * The names of column choices cleared because the new dataset lacks them
    pub fn set_current(&self, id: &str, dataset: TabularDataset) -> Vec<String> {
        let columns = dataset.column_count();
        let rows = dataset.row_count();
        match self.with_session(id, |s| s.set_dataset(dataset)) {
            Some(cleared) => {
                info!(
                    "Session {} now holds a {}x{} dataset (cleared selections: {:?})",
                    id, rows, columns, cleared
                );
                cleared
            }
            None => {
                warn!("Dropping dataset for unknown session {}", id);
                Vec::new()
            }
        }
    }

    pub fn get_current(&self, id: &str) -> Option<TabularDataset> {
        self.read(id, |s| s.dataset.clone()).flatten()
    }

    pub fn selection(&self, id: &str) -> SelectionState {
        self.read(id, |s| s.selection.clone()).unwrap_or_default()
    }

    pub fn update_selection(&self, id: &str, selection: SelectionState) -> SessionPhase {
        self.with_session(id, |s| {
            s.set_selection(selection);
            s.phase
        })
        .unwrap_or_default()
    }

    pub fn record_outcome(&self, id: &str, outcome: &ChartOutcome) -> SessionPhase {
        self.with_session(id, |s| {
            s.record_outcome(outcome);
            s.phase
        })
        .unwrap_or_default()
    }

    pub fn phase(&self, id: &str) -> SessionPhase {
        self.read(id, |s| s.phase).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CellValue;
    use crate::graph::ChartKind;
    use crate::selection::PlotType;

    fn dataset(columns: &[&str]) -> TabularDataset {
        TabularDataset::new(
            columns.iter().map(|c| c.to_string()).collect(),
            vec![columns.iter().map(|_| CellValue::Int(1)).collect()],
        )
        .unwrap()
    }

    fn chosen(x: &str, y: &str) -> SelectionState {
        SelectionState {
            plot_type: Some(PlotType::Scatter),
            x_column: Some(x.to_string()),
            y_column: Some(y.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn new_session_has_no_dataset() {
        let store = SessionStore::new();
        let id = store.create_session();
        assert_eq!(store.get_current(&id), None);
        assert_eq!(store.phase(&id), SessionPhase::NoDataset);
        assert_eq!(store.lock().len(), 1);
    }

    #[test]
    fn last_upload_wins_and_clears_stale_selection() {
        let store = SessionStore::new();
        let id = store.create_session();

        store.set_current(&id, dataset(&["a", "b"]));
        store.update_selection(&id, chosen("a", "b"));

        let replacement = dataset(&["a", "c"]);
        let cleared = store.set_current(&id, replacement.clone());

        assert_eq!(cleared, vec!["b".to_string()]);
        assert_eq!(store.get_current(&id), Some(replacement));
        let selection = store.selection(&id);
        assert_eq!(selection.x_column.as_deref(), Some("a"));
        assert_eq!(selection.y_column, None);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new();
        let alice = store.create_session();
        let bob = store.create_session();
        assert_ne!(alice, bob);

        store.set_current(&alice, dataset(&["x"]));
        assert!(store.get_current(&alice).is_some());
        assert!(store.get_current(&bob).is_none());
    }

    #[test]
    fn phases_follow_the_flow() {
        let store = SessionStore::new();
        let id = store.create_session();

        // selecting before any upload keeps the session without a dataset
        assert_eq!(store.update_selection(&id, chosen("a", "b")), SessionPhase::NoDataset);

        store.set_current(&id, dataset(&["a", "b"]));
        assert_eq!(store.phase(&id), SessionPhase::DatasetLoaded);

        let partial = SelectionState {
            x_column: Some("a".to_string()),
            ..Default::default()
        };
        assert_eq!(store.update_selection(&id, partial), SessionPhase::SelectionsPending);
        assert_eq!(
            store.update_selection(&id, chosen("a", "b")),
            SessionPhase::SelectionsComplete
        );

        assert_eq!(
            store.record_outcome(&id, &ChartOutcome::NotTriggered),
            SessionPhase::SelectionsComplete
        );

        let spec = ChartSpec {
            kind: ChartKind::Scatter,
            x_column: "a".to_string(),
            y_column: "b".to_string(),
            bin_count: None,
        };
        assert_eq!(
            store.record_outcome(&id, &ChartOutcome::Produced(spec)),
            SessionPhase::ChartRendered
        );
        assert_eq!(
            store.record_outcome(&id, &ChartOutcome::Empty),
            SessionPhase::ChartRendered
        );

        store.set_current(&id, dataset(&["a", "b"]));
        assert_eq!(store.phase(&id), SessionPhase::DatasetLoaded);
        assert_eq!(store.with_session(&id, |s| s.last_chart.is_none()), Some(true));
    }

    #[test]
    fn unknown_ids_are_never_stored() {
        let store = SessionStore::new();

        assert_eq!(store.get_current("made-up"), None);
        assert_eq!(store.phase("made-up"), SessionPhase::NoDataset);
        assert_eq!(store.selection("made-up"), SelectionState::default());
        assert!(store.set_current("made-up", dataset(&["a"])).is_empty());
        assert_eq!(
            store.update_selection("made-up", chosen("a", "b")),
            SessionPhase::NoDataset
        );
        assert!(!store.touch("made-up"));

        assert!(store.lock().is_empty());
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::with_limits(Duration::ZERO, 10);
        let id = store.create_session();

        assert!(!store.touch(&id));
        assert!(store.lock().is_empty());
        assert_eq!(store.get_current(&id), None);
    }

    #[test]
    fn full_store_evicts_least_recently_used() {
        let store = SessionStore::with_limits(Duration::from_secs(3600), 2);
        let first = store.create_session();
        std::thread::sleep(Duration::from_millis(2));
        let second = store.create_session();
        std::thread::sleep(Duration::from_millis(2));
        assert!(store.touch(&first));
        std::thread::sleep(Duration::from_millis(2));

        let third = store.create_session();
        assert_eq!(store.lock().len(), 2);
        assert!(store.touch(&first));
        assert!(store.touch(&third));
        assert!(!store.touch(&second));
    }
}
