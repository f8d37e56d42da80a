//! Core data model.
//!
//! An event is a staffed occurrence identified by a business code. Each event
//! owns the crew rostered onto it, with one aggregated assignment per crew
//! member. Jobs are identified by a [`JobKey`] and move through [`JobState`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An event and its crew, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Business event code (e.g. "OTH #2026-001").
    pub id: String,
    crew: Vec<CrewAssignment>,
}

impl Event {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            crew: Vec::new(),
        }
    }

    pub fn crew(&self) -> &[CrewAssignment] {
        &self.crew
    }

    pub fn crew_member(&self, crew_id: &str) -> Option<&CrewAssignment> {
        self.crew.iter().find(|c| c.id == crew_id)
    }

    /// Record one (date, role) occurrence for a crew member, creating their
    /// assignment on first sight.
    pub fn record(&mut self, crew_id: &str, name: &str, role: &str, date: &str) {
        match self.crew.iter_mut().find(|c| c.id == crew_id) {
            Some(existing) => existing.push(role, date),
            None => {
                let mut assignment = CrewAssignment::new(crew_id, name);
                assignment.push(role, date);
                self.crew.push(assignment);
            }
        }
    }

    /// Crew sorted for display: numeric ids ascending, then the rest by text.
    pub fn crew_for_display(&self) -> Vec<CrewAssignment> {
        let mut crew = self.crew.clone();
        crew.sort_by(|a, b| display_order(&a.id, &b.id));
        crew
    }
}

/// Display ordering for crew ids. Only used for presentation.
pub fn display_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

// ---------------------------------------------------------------------------
// Crew assignment
// ---------------------------------------------------------------------------

/// One crew member's roles and dates within an event.
///
/// `roles[i]` and `dates[i]` describe the same occurrence. The two sequences
/// can only grow together, so their lengths always match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewAssignment {
    /// Crew member id. Opaque; never compared numerically except for display.
    pub id: String,
    pub name: String,
    roles: Vec<String>,
    dates: Vec<String>,
}

impl CrewAssignment {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles: Vec::new(),
            dates: Vec::new(),
        }
    }

    pub fn push(&mut self, role: &str, date: &str) {
        self.roles.push(role.to_string());
        self.dates.push(date.to_string());
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    /// Distinct roles in first-seen order, comma joined.
    pub fn roles_label(&self) -> String {
        union_join(&self.roles)
    }

    /// Distinct dates in first-seen order, comma joined.
    pub fn dates_label(&self) -> String {
        union_join(&self.dates)
    }
}

fn union_join(values: &[String]) -> String {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|v| seen.insert(v.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Job identity
// ---------------------------------------------------------------------------

/// Identifies one resumable job stream: a document plus a sheet or an
/// operation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub document_id: String,
    pub scope: String,
}

impl JobKey {
    pub fn new(document_id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            scope: scope.into(),
        }
    }

    /// Key under which the continuation handle is stored.
    pub fn trigger_key(&self) -> String {
        format!("{self}:trigger")
    }

    pub fn lease_key(&self) -> String {
        format!("{self}:lease")
    }

    /// Key for a cached intermediate result belonging to this job.
    pub fn blob_key(&self, name: &str) -> String {
        format!("{self}:{name}")
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.document_id, self.scope)
    }
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// Lifecycle of one job key across invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Nothing running, nothing pending.
    Idle,
    /// An invocation is iterating the work list.
    Running,
    /// Checkpoint written, continuation armed.
    Suspended,
}

impl JobState {
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Suspended)
                | (Running, Idle)       // queue exhausted or item failed
                | (Suspended, Running) // continuation fired
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Suspended => "suspended",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_occurrences_merge_into_one_assignment() {
        let mut event = Event::new("OTH#1");
        event.record("1", "David", "IC", "1 June");
        event.record("3", "Aaron", "IC", "1 June");
        event.record("1", "David", "Usher", "2 June");

        assert_eq!(event.crew().len(), 2);
        let david = event.crew_member("1").unwrap();
        assert_eq!(david.roles(), ["IC", "Usher"]);
        assert_eq!(david.dates(), ["1 June", "2 June"]);
        assert_eq!(david.roles().len(), david.dates().len());
    }

    #[test]
    fn labels_deduplicate_in_first_seen_order() {
        let mut crew = CrewAssignment::new("1", "David");
        crew.push("IC", "1 June");
        crew.push("Usher", "1 June");
        crew.push("IC", "2 June");
        assert_eq!(crew.roles_label(), "IC,Usher");
        assert_eq!(crew.dates_label(), "1 June,2 June");
    }

    #[test]
    fn display_order_sorts_numeric_ids_numerically() {
        let mut event = Event::new("E");
        for id in ["10", "2", "abc", "1"] {
            event.record(id, "n", "r", "d");
        }
        let ids: Vec<_> = event
            .crew_for_display()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, ["1", "2", "10", "abc"]);
        // Storage order is untouched.
        assert_eq!(event.crew()[0].id, "10");
    }

    #[test]
    fn job_key_namespaces_do_not_collide() {
        let key = JobKey::new("doc", "Jun");
        assert_eq!(key.to_string(), "doc_Jun");
        assert_ne!(key.to_string(), key.trigger_key());
        assert_ne!(key.trigger_key(), key.lease_key());
        assert_eq!(key.blob_key("events"), "doc_Jun:events");
    }

    #[test]
    fn job_state_transitions() {
        use JobState::*;
        assert!(Idle.can_transition_to(Running));
        assert!(Running.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Running));
        assert!(Running.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Suspended));
        assert!(!Suspended.can_transition_to(Idle));
    }
}
