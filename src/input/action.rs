//! Action Schemas and Input Data
//!
//! Games declare their actions once at registration ("move" is a vector,
//! "split" is a button); a frame's input is then a packed record keyed by
//! compact action ids instead of a free-form string map. All values are
//! fixed-point or boolean, so equality is exact and deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::fixed::Fixed;
use crate::error::{EngineError, EngineResult};

/// Compact id assigned to an action at registration.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActionId(pub u8);

/// Shape of an action's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Single fixed-point value.
    Scalar,
    /// Fixed-point 2D value.
    Vector,
    /// Pressed / not pressed.
    Button,
}

/// One declared action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionDef {
    /// Action name, unique per registry.
    pub name: String,
    /// Compact id.
    pub id: ActionId,
    /// Declared value shape.
    pub kind: ActionKind,
}

/// Registry of declared actions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionRegistry {
    defs: Vec<ActionDef>,
    by_name: BTreeMap<String, ActionId>,
}

impl ActionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an action; ids are assigned in registration order.
    pub fn register(&mut self, name: &str, kind: ActionKind) -> EngineResult<ActionId> {
        if self.by_name.contains_key(name) {
            return Err(EngineError::Programmer(format!(
                "action '{}' already registered",
                name
            )));
        }
        if self.defs.len() > u8::MAX as usize {
            return Err(EngineError::Resource("action-id space full".into()));
        }
        let id = ActionId(self.defs.len() as u8);
        self.defs.push(ActionDef {
            name: name.to_string(),
            id,
            kind,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Id for an action name.
    pub fn id(&self, name: &str) -> Option<ActionId> {
        self.by_name.get(name).copied()
    }

    /// Definition for an id.
    pub fn def(&self, id: ActionId) -> Option<&ActionDef> {
        self.defs.get(id.0 as usize)
    }

    /// Number of declared actions.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether no actions are declared.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Value of one action in one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionValue {
    /// Single fixed-point value.
    Scalar(Fixed),
    /// Fixed-point 2D value.
    Vector {
        /// X component.
        x: Fixed,
        /// Y component.
        y: Fixed,
    },
    /// Pressed / not pressed.
    Button(bool),
}

impl ActionValue {
    /// Shape of this value.
    pub const fn kind(self) -> ActionKind {
        match self {
            ActionValue::Scalar(_) => ActionKind::Scalar,
            ActionValue::Vector { .. } => ActionKind::Vector,
            ActionValue::Button(_) => ActionKind::Button,
        }
    }
}

/// One client's input for one frame: action id → value.
///
/// Equality is shallow by construction (same key set, per-key `==`), which
/// is exactly the comparison `InputHistory::confirm` performs to detect
/// mispredictions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputData {
    values: BTreeMap<ActionId, ActionValue>,
}

impl InputData {
    /// Empty input (the idle prediction).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an action value, replacing any previous one.
    pub fn set(&mut self, id: ActionId, value: ActionValue) -> &mut Self {
        self.values.insert(id, value);
        self
    }

    /// Value for an action, if present.
    pub fn get(&self, id: ActionId) -> Option<ActionValue> {
        self.values.get(&id).copied()
    }

    /// Whether no actions are present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate (action, value) in ascending action-id order.
    pub fn iter(&self) -> impl Iterator<Item = (ActionId, ActionValue)> + '_ {
        self.values.iter().map(|(id, v)| (*id, *v))
    }
}

/// The payload a participant submits for a frame: either a lifecycle
/// transition or ordinary game input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPayload {
    /// Participant joined the room.
    Join,
    /// Participant left the room.
    Leave,
    /// Ordinary per-frame game input.
    Game(InputData),
}

impl InputPayload {
    /// Whether this is a join/leave transition.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, InputPayload::Join | InputPayload::Leave)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::FIXED_ONE;

    #[test]
    fn test_registry_assigns_sequential_ids() {
        let mut reg = ActionRegistry::new();
        let mv = reg.register("move", ActionKind::Vector).unwrap();
        let split = reg.register("split", ActionKind::Button).unwrap();
        assert_eq!(mv, ActionId(0));
        assert_eq!(split, ActionId(1));
        assert_eq!(reg.id("move"), Some(mv));
        assert_eq!(reg.def(split).unwrap().kind, ActionKind::Button);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = ActionRegistry::new();
        reg.register("move", ActionKind::Vector).unwrap();
        let err = reg.register("move", ActionKind::Scalar).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Programmer);
    }

    #[test]
    fn test_input_data_shallow_equality() {
        let mv = ActionId(0);
        let jump = ActionId(1);

        let mut a = InputData::new();
        a.set(mv, ActionValue::Vector { x: FIXED_ONE, y: 0 });

        let mut b = InputData::new();
        b.set(mv, ActionValue::Vector { x: FIXED_ONE, y: 0 });
        assert_eq!(a, b);

        // differing value
        b.set(mv, ActionValue::Vector { x: 0, y: 0 });
        assert_ne!(a, b);

        // differing key set
        let mut c = a.clone();
        c.set(jump, ActionValue::Button(true));
        assert_ne!(a, c);
    }

    #[test]
    fn test_iteration_order_ascending() {
        let mut data = InputData::new();
        data.set(ActionId(3), ActionValue::Button(true));
        data.set(ActionId(1), ActionValue::Scalar(5));
        data.set(ActionId(2), ActionValue::Scalar(7));
        let ids: Vec<u8> = data.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_payload_lifecycle_split() {
        assert!(InputPayload::Join.is_lifecycle());
        assert!(InputPayload::Leave.is_lifecycle());
        assert!(!InputPayload::Game(InputData::new()).is_lifecycle());
    }
}
