use crate::queue::model::QueueStatus;
use serde::Serialize;
use std::fmt;

/// Everything that can happen to a queue item after it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEvent {
    Edit,
    Remove,
    /// dequeue-for-send, manual send and retry all claim the item.
    Claim,
    Succeed,
    Fail,
}

impl QueueEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEvent::Edit => "edit",
            QueueEvent::Remove => "remove",
            QueueEvent::Claim => "claim",
            QueueEvent::Succeed => "succeed",
            QueueEvent::Fail => "fail",
        }
    }
}

impl fmt::Display for QueueEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(QueueStatus),
    Delete,
}

/// The queue-item state machine. `None` means the event is not allowed from
/// `from`; callers turn that into the matching rejection.
pub fn transition(from: QueueStatus, event: QueueEvent) -> Option<Transition> {
    use QueueEvent as E;
    use QueueStatus as S;

    match (from, event) {
        (S::Waiting, E::Edit) => Some(Transition::To(S::Waiting)),
        (S::Waiting, E::Remove) => Some(Transition::Delete),
        (S::Waiting | S::Failed, E::Claim) => Some(Transition::To(S::Processing)),
        (S::Processing, E::Succeed) => Some(Transition::To(S::Complete)),
        (S::Processing, E::Fail) => Some(Transition::To(S::Failed)),

        (S::Processing | S::Complete | S::Failed, E::Edit | E::Remove) => None,
        (S::Processing | S::Complete, E::Claim) => None,
        (S::Waiting | S::Complete | S::Failed, E::Succeed | E::Fail) => None,
    }
}

/// Every status `event` is allowed from, read off [`transition`].
pub fn allowed_from(event: QueueEvent) -> Vec<QueueStatus> {
    QueueStatus::ALL
        .into_iter()
        .filter(|s| transition(*s, event).is_some())
        .collect()
}

/// Who is claiming an item; decides which prior statuses the claim accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    /// Manual send of explicit queue ids.
    Manual,
    /// Manual retry of explicit, previously failed queue ids.
    Retry,
}

impl ClaimKind {
    /// The claim sources of the state machine; a retry only takes failed items.
    pub fn sources(&self) -> Vec<QueueStatus> {
        allowed_from(QueueEvent::Claim)
            .into_iter()
            .filter(|s| match self {
                ClaimKind::Manual => true,
                ClaimKind::Retry => *s == QueueStatus::Failed,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [QueueStatus; 4] = QueueStatus::ALL;

    #[test]
    fn edit_and_remove_only_from_waiting() {
        for s in ALL {
            let edit = transition(s, QueueEvent::Edit);
            let remove = transition(s, QueueEvent::Remove);
            if s == QueueStatus::Waiting {
                assert_eq!(edit, Some(Transition::To(QueueStatus::Waiting)));
                assert_eq!(remove, Some(Transition::Delete));
            } else {
                assert_eq!(edit, None, "edit from {s}");
                assert_eq!(remove, None, "remove from {s}");
            }
        }
    }

    #[test]
    fn failed_items_re_enter_processing() {
        assert_eq!(
            transition(QueueStatus::Failed, QueueEvent::Claim),
            Some(Transition::To(QueueStatus::Processing))
        );
        assert_eq!(transition(QueueStatus::Complete, QueueEvent::Claim), None);
        assert_eq!(transition(QueueStatus::Processing, QueueEvent::Claim), None);
    }

    #[test]
    fn outcomes_only_from_processing() {
        for s in ALL {
            let ok = transition(s, QueueEvent::Succeed);
            let fail = transition(s, QueueEvent::Fail);
            if s == QueueStatus::Processing {
                assert_eq!(ok, Some(Transition::To(QueueStatus::Complete)));
                assert_eq!(fail, Some(Transition::To(QueueStatus::Failed)));
            } else {
                assert!(ok.is_none() && fail.is_none());
            }
        }
    }

    #[test]
    fn claim_sources_follow_the_state_machine() {
        assert_eq!(
            ClaimKind::Manual.sources(),
            vec![QueueStatus::Waiting, QueueStatus::Failed]
        );
        assert_eq!(ClaimKind::Retry.sources(), vec![QueueStatus::Failed]);
        assert_eq!(allowed_from(QueueEvent::Edit), vec![QueueStatus::Waiting]);
        assert_eq!(allowed_from(QueueEvent::Succeed), vec![QueueStatus::Processing]);
    }
}
