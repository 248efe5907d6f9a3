use crate::queue::model::QueueStatus;
use crate::queue::state::QueueEvent;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Company,
    Draft,
    QueueItem,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Company => "company",
            EntityKind::Draft => "draft",
            EntityKind::QueueItem => "queue item",
        })
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("queue item {id} is not editable (status={status})")]
    NotEditable { id: Uuid, status: QueueStatus },

    #[error("queue item {id} cannot {event} from status {from}")]
    InvalidTransition {
        id: Uuid,
        from: QueueStatus,
        event: QueueEvent,
    },

    #[error("email provider failure: {0}")]
    Provider(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl QueueError {
    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        QueueError::NotFound { kind, id }
    }

    /// Rejection for an event the state machine refuses.
    pub fn rejected(id: Uuid, from: QueueStatus, event: QueueEvent) -> Self {
        match event {
            QueueEvent::Edit | QueueEvent::Remove => QueueError::NotEditable { id, status: from },
            _ => QueueError::InvalidTransition { id, from, event },
        }
    }
}
