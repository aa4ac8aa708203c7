//! Local chat message model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use murmur_shared::{
    ConversationKey, Direction, MessageId, MessageKind, ServerMessage, TempId, UserId,
};

/// How a message is identified in a conversation's index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageRef {
    Temp(TempId),
    Server(MessageId),
}

/// Per-message delivery state machine.
///
/// `Pending` and `Failed` carry the client tempId, `Sent` the server id, so
/// a message is always identified by exactly one of the two.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Delivery {
    Pending { temp_id: TempId },
    Sent { id: MessageId },
    Failed { temp_id: TempId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub conversation: ConversationKey,
    pub direction: Direction,
    pub sender: UserId,
    pub body: String,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
    /// For outbound messages: the peer has read it.
    pub read_by_peer: bool,
    pub delivery: Delivery,
}

impl Message {
    pub fn pending(
        conversation: ConversationKey,
        sender: UserId,
        temp_id: TempId,
        body: String,
        kind: MessageKind,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation,
            direction: Direction::Outbound,
            sender,
            body,
            kind,
            sent_at,
            read_by_peer: false,
            delivery: Delivery::Pending { temp_id },
        }
    }

    pub fn from_server(record: &ServerMessage, conversation: ConversationKey, me: &UserId) -> Self {
        let direction = if record.sender.id() == me {
            Direction::Outbound
        } else {
            Direction::Inbound
        };
        Self {
            conversation,
            direction,
            sender: record.sender.id().clone(),
            body: record.content.clone(),
            kind: record.kind.clone(),
            sent_at: record.created_date,
            read_by_peer: direction == Direction::Outbound && record.read,
            delivery: Delivery::Sent {
                id: record.id.clone(),
            },
        }
    }

    pub fn id(&self) -> Option<&MessageId> {
        match &self.delivery {
            Delivery::Sent { id } => Some(id),
            _ => None,
        }
    }

    pub fn temp_id(&self) -> Option<TempId> {
        match &self.delivery {
            Delivery::Pending { temp_id } | Delivery::Failed { temp_id, .. } => Some(*temp_id),
            Delivery::Sent { .. } => None,
        }
    }

    pub fn state(&self) -> DeliveryState {
        match self.delivery {
            Delivery::Pending { .. } => DeliveryState::Pending,
            Delivery::Sent { .. } => DeliveryState::Sent,
            Delivery::Failed { .. } => DeliveryState::Failed,
        }
    }

    pub fn reference(&self) -> MessageRef {
        match &self.delivery {
            Delivery::Pending { temp_id } | Delivery::Failed { temp_id, .. } => {
                MessageRef::Temp(*temp_id)
            }
            Delivery::Sent { id } => MessageRef::Server(id.clone()),
        }
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == Direction::Outbound
    }
}
