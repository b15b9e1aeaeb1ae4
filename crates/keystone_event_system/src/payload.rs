//! Event payloads delivered by the platform and forwarded to handlers.

use crate::error::HandlerError;
use crate::types::{ColShapeRef, EntityRef};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Positional arguments of a generic event.
///
/// Arguments are kept as JSON values so they can cross the runtime boundary
/// unchanged. Cloning is cheap: the list is shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs {
    source: Option<EntityRef>,
    values: Arc<Vec<Value>>,
}

impl EventArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            source: None,
            values: Arc::new(values),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Arguments of an event raised by a specific player.
    pub fn from_player(player: EntityRef, values: Vec<Value>) -> Self {
        Self {
            source: Some(player),
            values: Arc::new(values),
        }
    }

    /// Appends a serializable argument.
    pub fn with<T: Serialize>(mut self, value: &T) -> Result<Self, HandlerError> {
        let value = serde_json::to_value(value)?;
        Arc::make_mut(&mut self.values).push(value);
        Ok(self)
    }

    /// The player that raised the event, for client-origin channels.
    pub fn source(&self) -> Option<EntityRef> {
        self.source
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Deserializes the argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self.values.get(index).ok_or_else(|| {
            HandlerError::InvalidPayload(format!(
                "missing argument {} (event has {})",
                index,
                self.values.len()
            ))
        })?;
        Ok(T::deserialize(value)?)
    }
}

/// A key/value mutation observed on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaChange {
    pub entity: EntityRef,
    pub key: String,
    pub value: Value,
    pub old_value: Value,
}

/// Everything a transport subscription can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Generic channels: arguments forwarded unchanged
    Args(EventArgs),
    /// Region enter/leave: the shape and the entity crossing it
    Region {
        shape: Arc<ColShapeRef>,
        entity: EntityRef,
    },
    /// Synced or stream-synced meta change
    MetaChange(Arc<MetaChange>),
}

impl EventPayload {
    pub fn args(&self) -> Result<&EventArgs, HandlerError> {
        match self {
            EventPayload::Args(args) => Ok(args),
            other => Err(HandlerError::InvalidPayload(format!(
                "expected arguments, got {}",
                other.kind()
            ))),
        }
    }

    pub fn region(&self) -> Result<(&ColShapeRef, EntityRef), HandlerError> {
        match self {
            EventPayload::Region { shape, entity } => Ok((shape, *entity)),
            other => Err(HandlerError::InvalidPayload(format!(
                "expected a region event, got {}",
                other.kind()
            ))),
        }
    }

    pub fn meta_change(&self) -> Result<&MetaChange, HandlerError> {
        match self {
            EventPayload::MetaChange(change) => Ok(change),
            other => Err(HandlerError::InvalidPayload(format!(
                "expected a meta change, got {}",
                other.kind()
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Args(_) => "args",
            EventPayload::Region { .. } => "region",
            EventPayload::MetaChange(_) => "meta change",
        }
    }
}

impl From<EventArgs> for EventPayload {
    fn from(args: EventArgs) -> Self {
        EventPayload::Args(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use serde_json::json;

    #[test]
    fn arguments_deserialize_by_position() {
        let args = EventArgs::new(vec![json!("hello"), json!(3)])
            .with(&vec![1u8, 2])
            .unwrap();

        assert_eq!(args.len(), 3);
        assert_eq!(args.get::<String>(0).unwrap(), "hello");
        assert_eq!(args.get::<u32>(1).unwrap(), 3);
        assert_eq!(args.get::<Vec<u8>>(2).unwrap(), vec![1, 2]);
        assert!(matches!(args.get::<u32>(5), Err(HandlerError::InvalidPayload(_))));
        assert!(matches!(args.get::<u32>(0), Err(HandlerError::Serialization(_))));
    }

    #[test]
    fn payload_accessors_reject_other_kinds() {
        let player = EntityRef::new(3, EntityKind::Player);
        let payload: EventPayload = EventArgs::from_player(player, vec![]).into();

        assert_eq!(payload.args().unwrap().source(), Some(player));
        assert!(payload.region().is_err());
        assert!(payload.meta_change().is_err());
    }
}
