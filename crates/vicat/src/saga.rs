//! The create-version sequence as an explicit, resumable list of steps.
//!
//! Creating a version takes several catalog calls with no transaction around
//! them. A [`VersionSaga`] records how far it got, so after a failure the
//! caller can see which steps ran, find the half-annotated clone, and hand
//! the saga back to [`crate::VersionGraph::resume`] to finish the job.
//! Every step after [`CreateVersionStep::Clone`] is safe to repeat, and
//! [`CreateVersionStep::MarkSource`] reads the source's marker afresh each
//! time it runs rather than trusting the earlier branching check.

use crate::catalog::EntityId;

/// One step of creating a version, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateVersionStep {
    /// Read the source's `superseded` marker; refuse if branching is not
    /// permitted and a newer version already exists.
    CheckBranching,
    /// Clone the source dataset under the new name.
    Clone,
    /// Record the new version on the source's `superseded` marker. Fails
    /// with `BranchingNotPermitted` if another successor appeared meanwhile
    /// and branching is off.
    MarkSource,
    /// Drop any `superseded` marker the clone copied from its source.
    StripInherited,
    /// Point the clone's `supersedes` marker at the source.
    LinkPredecessor,
    /// Set or clear the clone's `comment` marker.
    SetComment,
}

impl CreateVersionStep {
    pub const ALL: [CreateVersionStep; 6] = [
        CreateVersionStep::CheckBranching,
        CreateVersionStep::Clone,
        CreateVersionStep::MarkSource,
        CreateVersionStep::StripInherited,
        CreateVersionStep::LinkPredecessor,
        CreateVersionStep::SetComment,
    ];

    /// Whether running the step twice has the same effect as running it once.
    pub fn is_idempotent(self) -> bool {
        !matches!(self, CreateVersionStep::Clone)
    }
}

impl std::fmt::Display for CreateVersionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CreateVersionStep::CheckBranching => "check-branching",
            CreateVersionStep::Clone => "clone",
            CreateVersionStep::MarkSource => "mark-source",
            CreateVersionStep::StripInherited => "strip-inherited",
            CreateVersionStep::LinkPredecessor => "link-predecessor",
            CreateVersionStep::SetComment => "set-comment",
        };
        write!(f, "{}", name)
    }
}

/// Progress of one create-version request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSaga {
    source: EntityId,
    name: String,
    comment: Option<String>,
    /// Outcome of the branching check: did the source already have a newer
    /// version when the saga started?
    pub(crate) source_had_successor: Option<bool>,
    pub(crate) new_id: Option<EntityId>,
    completed: Vec<CreateVersionStep>,
}

impl VersionSaga {
    pub fn new(source: EntityId, name: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            source,
            name: name.into(),
            comment,
            source_had_successor: None,
            new_id: None,
            completed: Vec::new(),
        }
    }

    pub fn source(&self) -> EntityId {
        self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Id of the clone, once the clone step has run.
    pub fn new_id(&self) -> Option<EntityId> {
        self.new_id
    }

    pub fn source_had_successor(&self) -> Option<bool> {
        self.source_had_successor
    }

    pub fn completed(&self) -> &[CreateVersionStep] {
        &self.completed
    }

    pub fn next_step(&self) -> Option<CreateVersionStep> {
        CreateVersionStep::ALL.get(self.completed.len()).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.next_step().is_none()
    }

    pub(crate) fn record(&mut self, step: CreateVersionStep) {
        debug_assert_eq!(self.next_step(), Some(step));
        self.completed.push(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_saga_starts_at_check() {
        let saga = VersionSaga::new(5, "ds_v2", Some("fix".into()));
        assert_eq!(saga.source(), 5);
        assert_eq!(saga.name(), "ds_v2");
        assert_eq!(saga.comment(), Some("fix"));
        assert_eq!(saga.next_step(), Some(CreateVersionStep::CheckBranching));
        assert!(saga.new_id().is_none());
        assert!(!saga.is_complete());
    }

    #[test]
    fn test_record_advances_in_order() {
        let mut saga = VersionSaga::new(1, "n", None);
        for step in CreateVersionStep::ALL {
            assert_eq!(saga.next_step(), Some(step));
            saga.record(step);
        }
        assert!(saga.is_complete());
        assert_eq!(saga.completed().len(), 6);
    }

    #[test]
    fn test_only_clone_is_not_idempotent() {
        let non_idempotent: Vec<_> = CreateVersionStep::ALL
            .into_iter()
            .filter(|s| !s.is_idempotent())
            .collect();
        assert_eq!(non_idempotent, vec![CreateVersionStep::Clone]);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(CreateVersionStep::StripInherited.to_string(), "strip-inherited");
    }
}
