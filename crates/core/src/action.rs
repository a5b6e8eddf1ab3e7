use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::effect::EffectDescriptor;

/// A state-changing intent, optionally carrying a declarative side effect.
///
/// Actions are **immutable** once built: fields are private and every
/// builder method consumes `self`. The reducer sees the action as a whole,
/// the outbox only ever looks at `effect`.
///
/// ## Optimistic updates
///
/// An action with an effect is applied to state right away (the optimistic
/// update). The effect's commit or rollback action is dispatched later, once
/// the network outcome is known, to reconcile the optimistic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    kind: String,

    #[serde(default)]
    payload: JsonValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    effect: Option<Box<EffectDescriptor>>,
}

impl Action {
    /// Build an action without an effect.
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            payload,
            effect: None,
        }
    }

    /// Build an action whose payload is `null`.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, JsonValue::Null)
    }

    /// Attach an effect descriptor.
    pub fn with_effect(mut self, effect: EffectDescriptor) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }

    /// Stable action name (e.g. "todo/add").
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn effect(&self) -> Option<&EffectDescriptor> {
        self.effect.as_deref()
    }

    /// Split into the action without its effect and the effect itself.
    pub fn into_parts(self) -> (Action, Option<EffectDescriptor>) {
        let effect = self.effect.map(|e| *e);
        (
            Action {
                kind: self.kind,
                payload: self.payload,
                effect: None,
            },
            effect,
        )
    }
}
