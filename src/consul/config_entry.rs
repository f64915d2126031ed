use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionAction {
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceIntention {
    pub name: String,
    pub action: IntentionAction,
}

/// A `service-intentions` config entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceIntentions {
    pub kind: String,
    pub name: String,
    pub sources: Vec<SourceIntention>,
}

impl ServiceIntentions {
    pub const KIND: &'static str = "service-intentions";

    /// Intentions for `destination` allowing traffic from `source`.
    pub fn allow(destination: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            name: destination.into(),
            sources: vec![SourceIntention {
                name: source.into(),
                action: IntentionAction::Allow,
            }],
        }
    }
}
