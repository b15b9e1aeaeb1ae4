//! # Core Types
//!
//! Plain data shared by the registry, the dispatcher and the platform layer:
//! channel kinds, entity and col-shape references, and the match options that
//! narrow region and meta-change bindings.

use crate::platform::{raw_events, TransportChannel};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Channels
// ============================================================================

/// Category of event traffic a binding listens on.
///
/// Generic channels (`On*`, `Once*`) forward their argument list unchanged.
/// Region and meta channels carry structured payloads and are narrowed by
/// [`MatchOptions`] before any handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelType {
    /// Server-local events
    On,
    /// Server-local events, first delivery only
    Once,
    /// Events sent by a game client
    OnClient,
    /// Events sent by a game client, first delivery only
    OnceClient,
    /// Events sent by the server side of the runtime
    OnServer,
    /// Events sent by the server side of the runtime, first delivery only
    OnceServer,
    /// Events raised by an embedded GUI view
    OnGui,
    /// An entity entered a col-shape
    EntityEnterRegion,
    /// An entity left a col-shape
    EntityLeaveRegion,
    /// A synced meta key changed on an entity
    MetaChange,
    /// A stream-synced meta key changed on an entity
    StreamedMetaChange,
}

impl ChannelType {
    /// Every channel, in the order the dispatcher activates them.
    pub const ALL: [ChannelType; 11] = [
        ChannelType::On,
        ChannelType::Once,
        ChannelType::OnClient,
        ChannelType::OnceClient,
        ChannelType::OnServer,
        ChannelType::OnceServer,
        ChannelType::OnGui,
        ChannelType::EntityEnterRegion,
        ChannelType::EntityLeaveRegion,
        ChannelType::MetaChange,
        ChannelType::StreamedMetaChange,
    ];

    /// Whether the subscription is torn down after its first delivery.
    pub fn is_once(self) -> bool {
        matches!(
            self,
            ChannelType::Once | ChannelType::OnceClient | ChannelType::OnceServer
        )
    }

    /// Whether bindings on this channel receive a region payload.
    pub fn is_region(self) -> bool {
        matches!(
            self,
            ChannelType::EntityEnterRegion | ChannelType::EntityLeaveRegion
        )
    }

    /// Whether bindings on this channel receive a meta-change payload.
    pub fn is_meta(self) -> bool {
        matches!(self, ChannelType::MetaChange | ChannelType::StreamedMetaChange)
    }

    /// The transport channel this binding category subscribes on.
    pub fn transport(self) -> TransportChannel {
        match self {
            ChannelType::On | ChannelType::Once => TransportChannel::Local,
            ChannelType::OnClient | ChannelType::OnceClient => TransportChannel::Client,
            ChannelType::OnServer | ChannelType::OnceServer => TransportChannel::Server,
            ChannelType::OnGui => TransportChannel::Gui,
            ChannelType::EntityEnterRegion
            | ChannelType::EntityLeaveRegion
            | ChannelType::MetaChange
            | ChannelType::StreamedMetaChange => TransportChannel::Runtime,
        }
    }

    /// Raw runtime event backing a specialized channel.
    ///
    /// Generic channels return `None`: their event name is whatever the
    /// binding declares.
    pub fn fixed_event_name(self) -> Option<&'static str> {
        match self {
            ChannelType::EntityEnterRegion => Some(raw_events::ENTITY_ENTER_COLSHAPE),
            ChannelType::EntityLeaveRegion => Some(raw_events::ENTITY_LEAVE_COLSHAPE),
            ChannelType::MetaChange => Some(raw_events::SYNCED_META_CHANGE),
            ChannelType::StreamedMetaChange => Some(raw_events::STREAM_SYNCED_META_CHANGE),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::On => "on",
            ChannelType::Once => "once",
            ChannelType::OnClient => "onClient",
            ChannelType::OnceClient => "onceClient",
            ChannelType::OnServer => "onServer",
            ChannelType::OnceServer => "onceServer",
            ChannelType::OnGui => "onGui",
            ChannelType::EntityEnterRegion => "entityEnterRegion",
            ChannelType::EntityLeaveRegion => "entityLeaveRegion",
            ChannelType::MetaChange => "metaChange",
            ChannelType::StreamedMetaChange => "streamedMetaChange",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities and regions
// ============================================================================

/// Runtime type of an entity tracked by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Player,
    Vehicle,
    Ped,
    Object,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Player => "player",
            EntityKind::Vehicle => "vehicle",
            EntityKind::Ped => "ped",
            EntityKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Lightweight handle to a host entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: u32,
    pub kind: EntityKind,
}

impl EntityRef {
    pub fn new(id: u32, kind: EntityKind) -> Self {
        Self { id, kind }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// 3D position in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Spatial volume covered by a col-shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BoundingRegion {
    Sphere { center: Vector3, radius: f32 },
    /// Infinite-height circle on the XY plane
    Circle { center: Vector3, radius: f32 },
    Cylinder { base: Vector3, radius: f32, height: f32 },
    Cuboid { min: Vector3, max: Vector3 },
}

impl BoundingRegion {
    /// Whether `point` lies inside the region (boundary inclusive).
    pub fn contains(&self, point: Vector3) -> bool {
        match *self {
            BoundingRegion::Sphere { center, radius } => {
                let dx = point.x - center.x;
                let dy = point.y - center.y;
                let dz = point.z - center.z;
                dx * dx + dy * dy + dz * dz <= radius * radius
            }
            BoundingRegion::Circle { center, radius } => {
                let dx = point.x - center.x;
                let dy = point.y - center.y;
                dx * dx + dy * dy <= radius * radius
            }
            BoundingRegion::Cylinder { base, radius, height } => {
                let dx = point.x - base.x;
                let dy = point.y - base.y;
                dx * dx + dy * dy <= radius * radius
                    && point.z >= base.z
                    && point.z <= base.z + height
            }
            BoundingRegion::Cuboid { min, max } => {
                point.x >= min.x
                    && point.x <= max.x
                    && point.y >= min.y
                    && point.y <= max.y
                    && point.z >= min.z
                    && point.z <= max.z
            }
        }
    }
}

/// A typed, optionally named trigger volume.
///
/// `shape_type` is the framework-level category (e.g. `"spawn"`, `"garage"`)
/// that region bindings match on; it is unrelated to the geometric
/// [`BoundingRegion`] variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColShapeRef {
    pub id: u32,
    pub shape_type: String,
    pub name: Option<String>,
    pub region: BoundingRegion,
}

// ============================================================================
// Match options
// ============================================================================

/// Channel-specific filters attached to region and meta bindings.
///
/// Region matching requires `shape_type` and meta matching requires
/// `entity_kind`; options missing them match nothing. The other fields only
/// constrain the match when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Expected col-shape category
    pub shape_type: Option<String>,
    /// Exact col-shape name
    pub shape_name: Option<String>,
    /// Required runtime type of the entity
    pub entity_kind: Option<EntityKind>,
    /// Exact meta key
    pub meta_key: Option<String>,
}

impl MatchOptions {
    /// Options for a region binding on shapes of `shape_type`.
    pub fn region(shape_type: impl Into<String>) -> Self {
        Self {
            shape_type: Some(shape_type.into()),
            ..Self::default()
        }
    }

    /// Options for a meta binding on entities of `kind`.
    pub fn meta(kind: EntityKind) -> Self {
        Self {
            entity_kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.shape_name = Some(name.into());
        self
    }

    pub fn for_entity(mut self, kind: EntityKind) -> Self {
        self.entity_kind = Some(kind);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.meta_key = Some(key.into());
        self
    }

    /// Region filters, applied in order: shape type, shape name, entity type.
    pub fn matches_region(&self, shape: &ColShapeRef, entity: &EntityRef) -> bool {
        if self.shape_type.as_deref() != Some(shape.shape_type.as_str()) {
            return false;
        }

        if let Some(expected) = &self.shape_name {
            if shape.name.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }

        self.entity_satisfies(entity)
    }

    /// Meta filters: entity type, then exact key.
    pub fn matches_meta(&self, entity: &EntityRef, key: &str) -> bool {
        if self.entity_kind != Some(entity.kind) {
            return false;
        }

        match &self.meta_key {
            Some(expected) => expected == key,
            None => true,
        }
    }

    fn entity_satisfies(&self, entity: &EntityRef) -> bool {
        self.entity_kind.map_or(true, |kind| kind == entity.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(shape_type: &str, name: Option<&str>) -> ColShapeRef {
        ColShapeRef {
            id: 1,
            shape_type: shape_type.to_string(),
            name: name.map(str::to_string),
            region: BoundingRegion::Sphere {
                center: Vector3::default(),
                radius: 5.0,
            },
        }
    }

    #[test]
    fn region_filters_apply_type_name_and_entity() {
        let player = EntityRef::new(1, EntityKind::Player);
        let vehicle = EntityRef::new(2, EntityKind::Vehicle);
        let options = MatchOptions::region("spawn")
            .named("zoneA")
            .for_entity(EntityKind::Player);

        assert!(options.matches_region(&shape("spawn", Some("zoneA")), &player));
        assert!(!options.matches_region(&shape("garage", Some("zoneA")), &player));
        assert!(!options.matches_region(&shape("spawn", Some("zoneB")), &player));
        assert!(!options.matches_region(&shape("spawn", None), &player));
        assert!(!options.matches_region(&shape("spawn", Some("zoneA")), &vehicle));
    }

    #[test]
    fn meta_filters_apply_entity_then_key() {
        let vehicle = EntityRef::new(7, EntityKind::Vehicle);
        let any_key = MatchOptions::meta(EntityKind::Vehicle);
        let fuel_only = MatchOptions::meta(EntityKind::Vehicle).with_key("fuel");

        assert!(any_key.matches_meta(&vehicle, "engine"));
        assert!(fuel_only.matches_meta(&vehicle, "fuel"));
        assert!(!fuel_only.matches_meta(&vehicle, "engine"));
        assert!(!fuel_only.matches_meta(&EntityRef::new(7, EntityKind::Player), "fuel"));
        assert!(!MatchOptions::default().matches_meta(&vehicle, "fuel"));
    }

    #[test]
    fn region_match_requires_a_shape_type() {
        let player = EntityRef::new(1, EntityKind::Player);
        let name_only = MatchOptions::default().named("zoneA");

        assert!(!name_only.matches_region(&shape("unrelated", Some("zoneA")), &player));
        assert!(!MatchOptions::default().matches_region(&shape("spawn", None), &player));
        assert!(MatchOptions::region("spawn").matches_region(&shape("spawn", None), &player));
    }

    #[test]
    fn bounding_regions_contain_points() {
        let cylinder = BoundingRegion::Cylinder {
            base: Vector3::new(0.0, 0.0, 0.0),
            radius: 2.0,
            height: 3.0,
        };
        assert!(cylinder.contains(Vector3::new(1.0, 1.0, 2.0)));
        assert!(!cylinder.contains(Vector3::new(1.0, 1.0, 4.0)));

        let cuboid = BoundingRegion::Cuboid {
            min: Vector3::new(-1.0, -1.0, -1.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };
        assert!(cuboid.contains(Vector3::new(1.0, 0.0, -1.0)));
        assert!(!cuboid.contains(Vector3::new(1.5, 0.0, 0.0)));

        let circle = BoundingRegion::Circle {
            center: Vector3::default(),
            radius: 1.0,
        };
        assert!(circle.contains(Vector3::new(0.5, 0.5, 900.0)));
    }

    #[test]
    fn specialized_channels_use_runtime_transport() {
        for channel in ChannelType::ALL {
            let fixed = channel.fixed_event_name().is_some();
            assert_eq!(fixed, channel.is_region() || channel.is_meta());
            assert_eq!(fixed, channel.transport() == TransportChannel::Runtime);
        }
    }
}
