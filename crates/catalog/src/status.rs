use serde::{Deserialize, Serialize};

/// Lifecycle status shared by product-like aggregates.
///
/// `draft ↔ active → archived`, with the two pending-drop states gating
/// time-scheduled releases. Archived is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Draft,
    Active,
    Archived,
    VisiblePendingDrop,
    HiddenPendingDrop,
}

impl LifecycleStatus {
    pub fn is_pending_drop(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::VisiblePendingDrop | LifecycleStatus::HiddenPendingDrop
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Draft => "draft",
            LifecycleStatus::Active => "active",
            LifecycleStatus::Archived => "archived",
            LifecycleStatus::VisiblePendingDrop => "visible_pending_drop",
            LifecycleStatus::HiddenPendingDrop => "hidden_pending_drop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(LifecycleStatus::VisiblePendingDrop).unwrap(),
            serde_json::json!("visible_pending_drop")
        );
    }
}
