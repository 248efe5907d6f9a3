use crate::queue::limits::DailyBudget;
use serde::Serialize;
use uuid::Uuid;

/// Outcome for one id of a batch call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemResult {
    pub fn ok(id: Uuid, email: Option<String>) -> Self {
        Self {
            id,
            success: true,
            email,
            error: None,
        }
    }

    pub fn err(id: Uuid, error: impl ToString) -> Self {
        Self {
            id,
            success: false,
            email: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<ItemResult>,
    pub success_count: usize,
    pub fail_count: usize,
}

impl BatchReport {
    pub fn push(&mut self, result: ItemResult) {
        if result.success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
        self.results.push(result);
    }

    pub fn result_for(&self, id: Uuid) -> Option<&ItemResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    LimitReached,
}

/// What one scheduled tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Skipped {
        reason: SkipReason,
        budget: DailyBudget,
    },
    /// Nothing to process.
    Idle { budget: DailyBudget },
    Sent {
        id: Uuid,
        email: String,
        budget: DailyBudget,
    },
    Failed {
        id: Uuid,
        error: String,
        budget: DailyBudget,
    },
}

impl TickOutcome {
    pub fn skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped { .. })
    }

    pub fn processed(&self) -> usize {
        match self {
            TickOutcome::Sent { .. } | TickOutcome::Failed { .. } => 1,
            TickOutcome::Skipped { .. } | TickOutcome::Idle { .. } => 0,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            TickOutcome::Skipped {
                reason: SkipReason::Disabled,
                ..
            } => "scheduled sending is disabled",
            TickOutcome::Skipped {
                reason: SkipReason::LimitReached,
                ..
            } => "daily limit reached",
            TickOutcome::Idle { .. } => "nothing to process",
            TickOutcome::Sent { .. } => "sent",
            TickOutcome::Failed { .. } => "send failed",
        }
    }
}
