//! Notices the engine publishes on the bus.

use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    codec::UnknownField,
    connection::ServingStatus,
    error::DecodeError,
    events::Event,
    loss::{LossObservation, ResetCause},
    tree::TopologyWarning,
};

/// Every notice type the engine can publish.
pub const NOTICE_TYPES: [&str; 6] = [
    LossObserved::EVENT_TYPE,
    SessionReset::EVENT_TYPE,
    MessageDiscarded::EVENT_TYPE,
    TopologyCorrupted::EVENT_TYPE,
    StatusChanged::EVENT_TYPE,
    UnknownFieldSeen::EVENT_TYPE,
];

#[derive(Debug, Clone, Serialize)]
pub struct NoticeHeader {
    pub event_id: Uuid,
    pub ts: SystemTime,
    /// Engine session the notice belongs to.
    pub session_id: Uuid,
}

impl NoticeHeader {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            ts: SystemTime::now(),
            session_id,
        }
    }
}

macro_rules! impl_notice {
    ($ty:ident, $event_type:literal) => {
        impl $ty {
            pub const EVENT_TYPE: &'static str = $event_type;
        }

        impl Event for $ty {
            fn event_id(&self) -> Uuid {
                self.header.event_id
            }

            fn event_type(&self) -> &'static str {
                Self::EVENT_TYPE
            }

            fn session_id(&self) -> Uuid {
                self.header.session_id
            }

            fn timestamp(&self) -> SystemTime {
                self.header.ts
            }

            fn as_any(&self) -> &dyn Any {
                self as &dyn Any
            }
        }
    };
}

/// Loss computed from one drop counter observation.
#[derive(Debug, Clone, Serialize)]
pub struct LossObserved {
    pub header: NoticeHeader,
    pub lost: u64,
    pub total_lost: u64,
}

impl_notice!(LossObserved, "loss.observed");

#[derive(Debug, Clone, Serialize)]
pub struct SessionReset {
    pub header: NoticeHeader,
    pub cause: ResetCause,
    pub previous: Option<u64>,
    pub baseline: u64,
    /// Whether the store was cleared in response.
    pub store_cleared: bool,
}

impl SessionReset {
    /// `None` unless the observation is a reset.
    pub fn from_observation(
        session_id: Uuid,
        observation: &LossObservation,
        store_cleared: bool,
    ) -> Option<Self> {
        match *observation {
            LossObservation::Reset {
                cause,
                previous,
                baseline,
            } => Some(Self {
                header: NoticeHeader::new(session_id),
                cause,
                previous,
                baseline,
                store_cleared,
            }),
            _ => None,
        }
    }
}

impl_notice!(SessionReset, "session.reset");

/// A frame was dropped because it could not be decoded.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDiscarded {
    pub header: NoticeHeader,
    /// Arrival index of the frame on its connection.
    pub frame: u64,
    pub truncated: bool,
    pub reason: String,
}

impl MessageDiscarded {
    pub fn new(session_id: Uuid, frame: u64, err: &DecodeError) -> Self {
        Self {
            header: NoticeHeader::new(session_id),
            frame,
            truncated: matches!(err, DecodeError::TruncatedMessage { .. }),
            reason: err.to_string(),
        }
    }
}

impl_notice!(MessageDiscarded, "message.discarded");

#[derive(Debug, Clone, Serialize)]
pub struct TopologyCorrupted {
    pub header: NoticeHeader,
    pub warning: TopologyWarning,
}

impl_notice!(TopologyCorrupted, "topology.corrupted");

#[derive(Debug, Clone, Serialize)]
pub struct StatusChanged {
    pub header: NoticeHeader,
    pub status: ServingStatus,
}

impl_notice!(StatusChanged, "connection.status");

#[derive(Debug, Clone, Serialize)]
pub struct UnknownFieldSeen {
    pub header: NoticeHeader,
    pub message: &'static str,
    pub tag: u32,
    pub wire_type: u8,
    pub len: usize,
}

impl UnknownFieldSeen {
    pub fn new(session_id: Uuid, field: &UnknownField) -> Self {
        Self {
            header: NoticeHeader::new(session_id),
            message: field.message,
            tag: field.tag,
            wire_type: field.wire_type as u8,
            len: field.raw.len(),
        }
    }
}

impl_notice!(UnknownFieldSeen, "codec.unknown_field");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_serialize_through_the_trait_object() {
        let session = Uuid::new_v4();
        let err = DecodeError::TruncatedMessage {
            declared: 9,
            remaining: 2,
        };
        let notice: Box<dyn Event> = Box::new(MessageDiscarded::new(session, 3, &err));

        let json = serde_json::to_value(&*notice).unwrap();
        assert_eq!(json["frame"], 3);
        assert_eq!(json["truncated"], true);
        assert_eq!(json["header"]["session_id"], session.to_string());
        assert_eq!(notice.event_type(), "message.discarded");
        assert_eq!(notice.session_id(), session);
    }

    #[test]
    fn only_resets_become_session_reset() {
        let session = Uuid::new_v4();
        assert!(
            SessionReset::from_observation(session, &LossObservation::Delta { lost: 3 }, false)
                .is_none()
        );
        let reset = SessionReset::from_observation(
            session,
            &LossObservation::Reset {
                cause: ResetCause::CounterDecreased,
                previous: Some(12),
                baseline: 3,
            },
            true,
        )
        .unwrap();
        assert_eq!(reset.baseline, 3);
        assert!(reset.store_cleared);
    }
}
