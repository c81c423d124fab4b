//! Identity types - entity references, timer keys and surrogate ids

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Business entity kinds that can own workflow timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Tender,
    Courier,
    Emd,
    ServiceAmc,
    ServiceVisit,
    CrmLead,
    CrmQuotation,
    OperationKickoff,
    OperationContract,
}

impl EntityType {
    /// All entity types, in declaration order
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Tender,
            EntityType::Courier,
            EntityType::Emd,
            EntityType::ServiceAmc,
            EntityType::ServiceVisit,
            EntityType::CrmLead,
            EntityType::CrmQuotation,
            EntityType::OperationKickoff,
            EntityType::OperationContract,
        ]
    }

    /// Storage and display form (e.g. "TENDER")
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Tender => "TENDER",
            EntityType::Courier => "COURIER",
            EntityType::Emd => "EMD",
            EntityType::ServiceAmc => "SERVICE_AMC",
            EntityType::ServiceVisit => "SERVICE_VISIT",
            EntityType::CrmLead => "CRM_LEAD",
            EntityType::CrmQuotation => "CRM_QUOTATION",
            EntityType::OperationKickoff => "OPERATION_KICKOFF",
            EntityType::OperationContract => "OPERATION_CONTRACT",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing an identifier from text
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Invalid entity reference '{0}' (expected TYPE:ID, e.g. TENDER:42)")]
    InvalidEntityRef(String),
}

impl FromStr for EntityType {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        EntityType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| IdParseError::UnknownEntityType(s.to_string()))
    }
}

/// A reference to one business entity: its type plus an opaque numeric id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: i64,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: i64) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }

    /// Build the timer key for one stage of this entity
    pub fn stage(&self, stage: impl Into<String>) -> TimerKey {
        TimerKey {
            entity: *self,
            stage: stage.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for EntityRef {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| IdParseError::InvalidEntityRef(s.to_string()))?;
        let entity_type = kind.parse()?;
        let entity_id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| IdParseError::InvalidEntityRef(s.to_string()))?;
        Ok(Self::new(entity_type, entity_id))
    }
}

/// Natural identity of a timer: one per entity and stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerKey {
    #[serde(flatten)]
    pub entity: EntityRef,
    pub stage: String,
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.stage)
    }
}

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }
    };
}

surrogate_id!(
    /// Surrogate id of a timer row
    TimerId
);
surrogate_id!(
    /// Surrogate id of a timer event row
    EventId
);
surrogate_id!(
    /// Surrogate id of a workflow step instance
    StepInstanceId
);
surrogate_id!(
    /// Identifier of a user in the host application (weak reference)
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("TENDER".parse::<EntityType>().unwrap(), EntityType::Tender);
        assert_eq!("tender".parse::<EntityType>().unwrap(), EntityType::Tender);
        assert_eq!(
            "service-amc".parse::<EntityType>().unwrap(),
            EntityType::ServiceAmc
        );
        assert!("INVOICE".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_display_matches_parse() {
        for t in EntityType::all() {
            assert_eq!(t.to_string().parse::<EntityType>().unwrap(), *t);
        }
    }

    #[test]
    fn test_entity_ref_parse() {
        let r: EntityRef = "TENDER:42".parse().unwrap();
        assert_eq!(r, EntityRef::new(EntityType::Tender, 42));
        assert_eq!(r.to_string(), "TENDER:42");

        assert!("TENDER".parse::<EntityRef>().is_err());
        assert!("TENDER:abc".parse::<EntityRef>().is_err());
        assert!("NOPE:1".parse::<EntityRef>().is_err());
    }

    #[test]
    fn test_timer_key_display() {
        let key = EntityRef::new(EntityType::Emd, 7).stage("emd_request");
        assert_eq!(key.to_string(), "EMD:7:emd_request");
    }

    #[test]
    fn test_user_id_serializes_transparently() {
        let json = serde_json::to_string(&UserId(12)).unwrap();
        assert_eq!(json, "12");
    }
}
