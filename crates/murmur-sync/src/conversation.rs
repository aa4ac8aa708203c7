//! In-memory message log of one conversation.
//!
//! Messages are kept oldest first. New messages are appended, history
//! pages are prepended, and nothing is ever reordered after insertion:
//! acknowledgments and echoes update the existing slot in place. An index
//! from [`MessageRef`] to list position enforces that mechanically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use murmur_shared::{ConversationKey, MessageKind, ServerMessage, TempId, UserId};

use crate::api::HistoryPage;
use crate::message::{Delivery, DeliveryState, Message, MessageRef};

/// Result of applying a server record to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new entry was appended at this position.
    Appended(usize),
    /// An optimistic entry at this position now carries the server record.
    Reconciled(usize),
    /// Already represented at this position; nothing changed.
    Duplicate(usize),
    /// No entry matches.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    Loaded { added: usize, has_more: bool },
    /// Another backfill for this conversation is still running.
    InFlight,
    /// The server reported no older pages.
    Exhausted,
}

#[derive(Debug, Clone)]
struct TypingFlag {
    user: UserId,
    until: Instant,
}

#[derive(Debug)]
pub struct Conversation {
    key: ConversationKey,
    me: UserId,
    messages: Vec<Message>,
    index: HashMap<MessageRef, usize>,
    has_more_history: bool,
    next_page: u32,
    backfill_in_flight: bool,
    typing: Option<TypingFlag>,
    unread: usize,
}

impl Conversation {
    pub fn new(key: ConversationKey, me: UserId) -> Self {
        Self {
            key,
            me,
            messages: Vec::new(),
            index: HashMap::new(),
            has_more_history: true,
            next_page: 1,
            backfill_in_flight: false,
            typing: None,
            unread: 0,
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, reference: &MessageRef) -> Option<&Message> {
        self.index.get(reference).map(|&pos| &self.messages[pos])
    }

    pub fn has_more_history(&self) -> bool {
        self.has_more_history
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    /// Whether `record` belongs to this conversation.
    pub fn owns(&self, record: &ServerMessage) -> bool {
        record.conversation_for(&self.me).as_ref() == Some(&self.key)
    }

    // -- outbound -----------------------------------------------------------

    /// Optimistically append an outbound message awaiting acknowledgment.
    pub fn insert_pending(
        &mut self,
        temp_id: TempId,
        body: String,
        kind: MessageKind,
        sent_at: DateTime<Utc>,
    ) -> usize {
        let message = Message::pending(
            self.key.clone(),
            self.me.clone(),
            temp_id,
            body,
            kind,
            sent_at,
        );
        self.push(message)
    }

    /// Attach the server record to the entry known by `temp_id`, in place.
    ///
    /// Pending and failed entries both accept the record: either way the
    /// server has stored the message.
    pub fn reconcile(&mut self, temp_id: TempId, record: &ServerMessage) -> Applied {
        let server_ref = MessageRef::Server(record.id.clone());
        let Some(pos) = self.index.get(&MessageRef::Temp(temp_id)).copied() else {
            return match self.index.get(&server_ref) {
                Some(&pos) => Applied::Duplicate(pos),
                None => Applied::Unknown,
            };
        };

        let entry = &mut self.messages[pos];
        entry.delivery = Delivery::Sent {
            id: record.id.clone(),
        };
        entry.sent_at = record.created_date;
        entry.body = record.content.clone();
        entry.kind = record.kind.clone();
        entry.read_by_peer = entry.read_by_peer || record.read;

        self.index.remove(&MessageRef::Temp(temp_id));

        // The record was already appended as a separate entry (echo without
        // tempId); keep the optimistic slot and drop the later copy.
        if let Some(other) = self.index.get(&server_ref).copied() {
            if other != pos {
                self.messages.remove(other);
                self.rebuild_index();
                let pos = if other < pos { pos - 1 } else { pos };
                debug!(temp_id = %temp_id, id = %record.id, "Collapsed duplicate entry");
                return Applied::Reconciled(pos);
            }
        }

        self.index.insert(server_ref, pos);
        Applied::Reconciled(pos)
    }

    /// Flag a pending entry as failed. Returns `false` if `temp_id` is not
    /// pending here.
    pub fn fail(&mut self, temp_id: TempId, reason: impl Into<String>) -> bool {
        let Some(&pos) = self.index.get(&MessageRef::Temp(temp_id)) else {
            return false;
        };
        let entry = &mut self.messages[pos];
        if entry.state() != DeliveryState::Pending {
            return false;
        }
        entry.delivery = Delivery::Failed {
            temp_id,
            reason: reason.into(),
        };
        true
    }

    /// Move a failed entry back to pending under `new_temp_id`, in the same
    /// slot. The old tempId is forgotten. Returns the body and kind to resend.
    pub fn retry(&mut self, old: TempId, new_temp_id: TempId) -> Option<(String, MessageKind)> {
        let pos = *self.index.get(&MessageRef::Temp(old))?;
        let entry = &mut self.messages[pos];
        if entry.state() != DeliveryState::Failed {
            return None;
        }
        entry.delivery = Delivery::Pending {
            temp_id: new_temp_id,
        };
        entry.sent_at = Utc::now();
        let resend = (entry.body.clone(), entry.kind.clone());

        self.index.remove(&MessageRef::Temp(old));
        self.index.insert(MessageRef::Temp(new_temp_id), pos);
        Some(resend)
    }

    // -- inbound ------------------------------------------------------------

    /// Apply a live `new-message` record.
    ///
    /// Appends only when no entry represents the record yet: a known server
    /// id is a duplicate, and our own message echoed back with its tempId
    /// reconciles the optimistic entry instead of adding a second one.
    pub fn apply_inbound(&mut self, record: &ServerMessage) -> Applied {
        if let Some(&pos) = self.index.get(&MessageRef::Server(record.id.clone())) {
            return Applied::Duplicate(pos);
        }

        if record.sender.id() == &self.me {
            if let Some(temp_id) = record.temp_id {
                if self.index.contains_key(&MessageRef::Temp(temp_id)) {
                    return self.reconcile(temp_id, record);
                }
            }
        }

        let message = Message::from_server(record, self.key.clone(), &self.me);
        if !message.is_outbound() {
            self.unread += 1;
            // A message from the peer implies they stopped typing.
            if self.typing.as_ref().map(|t| &t.user) == Some(&message.sender) {
                self.typing = None;
            }
        }
        Applied::Appended(self.push(message))
    }

    /// The peer read everything we sent. Returns how many flags flipped.
    pub fn apply_read_receipt(&mut self, reader: &UserId) -> usize {
        if self.key.peer() != Some(reader) {
            return 0;
        }
        let mut flipped = 0;
        for message in &mut self.messages {
            if message.is_outbound() && !message.read_by_peer {
                message.read_by_peer = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Zero the unread count. Returns the previous count.
    pub fn mark_read_local(&mut self) -> usize {
        std::mem::take(&mut self.unread)
    }

    pub fn set_typing(&mut self, user: UserId, is_typing: bool, until: Instant) {
        if is_typing {
            self.typing = Some(TypingFlag { user, until });
        } else if self.typing.as_ref().map(|t| &t.user) == Some(&user) {
            self.typing = None;
        }
    }

    /// Who is typing, if the flag has not expired at `now`.
    pub fn typing_user(&self, now: Instant) -> Option<&UserId> {
        self.typing
            .as_ref()
            .filter(|flag| flag.until > now)
            .map(|flag| &flag.user)
    }

    // -- history ------------------------------------------------------------

    /// Reserve the next page for fetching. Refused while a backfill is in
    /// flight or once history is exhausted.
    pub fn begin_backfill(&mut self) -> Result<u32, BackfillOutcome> {
        if self.backfill_in_flight {
            return Err(BackfillOutcome::InFlight);
        }
        if !self.has_more_history {
            return Err(BackfillOutcome::Exhausted);
        }
        self.backfill_in_flight = true;
        Ok(self.next_page)
    }

    pub fn abort_backfill(&mut self) {
        self.backfill_in_flight = false;
    }

    /// Prepend a fetched page. Records already present (live traffic that
    /// overlaps the page) and records of other conversations are skipped.
    pub fn finish_backfill(&mut self, page: u32, result: HistoryPage) -> BackfillOutcome {
        self.backfill_in_flight = false;
        self.next_page = page + 1;
        self.has_more_history = result.has_more;

        let mut older: Vec<Message> = result
            .messages
            .iter()
            .filter(|record| {
                let fresh = !self
                    .index
                    .contains_key(&MessageRef::Server(record.id.clone()));
                let ours = self.owns(record);
                if !ours {
                    debug!(id = %record.id, conversation = %self.key, "Skipping foreign history record");
                }
                fresh && ours
            })
            .map(|record| Message::from_server(record, self.key.clone(), &self.me))
            .collect();
        older.sort_by_key(|m| m.sent_at);
        older.dedup_by(|a, b| a.id() == b.id());

        let added = older.len();
        if added > 0 {
            older.append(&mut self.messages);
            self.messages = older;
            self.rebuild_index();
        }

        BackfillOutcome::Loaded {
            added,
            has_more: self.has_more_history,
        }
    }

    // -- internals ----------------------------------------------------------

    fn push(&mut self, message: Message) -> usize {
        let pos = self.messages.len();
        self.index.insert(message.reference(), pos);
        self.messages.push(message);
        pos
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .messages
            .iter()
            .enumerate()
            .map(|(pos, m)| (m.reference(), pos))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use murmur_shared::protocol::UserRef;
    use murmur_shared::MessageId;

    fn me() -> UserId {
        UserId::from("me")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    fn convo() -> Conversation {
        Conversation::new(ConversationKey::Peer(bob()), me())
    }

    fn from_bob(id: &str, minute: u32) -> ServerMessage {
        ServerMessage {
            id: MessageId::from(id),
            sender: UserRef::Id(bob()),
            receiver: Some(UserRef::Id(me())),
            group: None,
            content: format!("body {id}"),
            kind: MessageKind::Text,
            created_date: format!("2024-05-01T10:{minute:02}:00Z").parse().unwrap(),
            read: false,
            temp_id: None,
        }
    }

    fn from_me(id: &str, temp: Option<u64>) -> ServerMessage {
        ServerMessage {
            id: MessageId::from(id),
            sender: UserRef::Id(me()),
            receiver: Some(UserRef::Id(bob())),
            group: None,
            content: "hello".into(),
            kind: MessageKind::Text,
            created_date: "2024-05-01T11:00:00Z".parse().unwrap(),
            read: false,
            temp_id: temp.map(TempId),
        }
    }

    #[test]
    fn test_ack_updates_pending_in_place() {
        let mut c = convo();
        c.apply_inbound(&from_bob("b1", 1));
        c.insert_pending(TempId(1001), "hello".into(), MessageKind::Text, Utc::now());
        c.apply_inbound(&from_bob("b2", 2));

        assert_eq!(c.messages()[1].state(), DeliveryState::Pending);
        assert_eq!(c.messages()[1].temp_id(), Some(TempId(1001)));

        let applied = c.reconcile(TempId(1001), &from_me("m1", None));
        assert_eq!(applied, Applied::Reconciled(1));
        assert_eq!(c.len(), 3);
        assert_eq!(c.messages()[1].id(), Some(&MessageId::from("m1")));
        assert_eq!(c.messages()[1].temp_id(), None);
        assert_eq!(c.messages()[1].state(), DeliveryState::Sent);
        assert!(c.get(&MessageRef::Temp(TempId(1001))).is_none());
        assert!(c.get(&MessageRef::Server(MessageId::from("m1"))).is_some());
    }

    #[test]
    fn test_self_echo_after_ack_is_ignored() {
        let mut c = convo();
        c.insert_pending(TempId(7), "hello".into(), MessageKind::Text, Utc::now());
        c.reconcile(TempId(7), &from_me("m1", None));

        assert_eq!(c.apply_inbound(&from_me("m1", Some(7))), Applied::Duplicate(0));
        assert_eq!(c.len(), 1);
        assert_eq!(c.unread(), 0);
    }

    #[test]
    fn test_self_echo_before_ack_reconciles() {
        let mut c = convo();
        c.insert_pending(TempId(7), "hello".into(), MessageKind::Text, Utc::now());

        assert_eq!(c.apply_inbound(&from_me("m1", Some(7))), Applied::Reconciled(0));
        assert_eq!(c.reconcile(TempId(7), &from_me("m1", None)), Applied::Duplicate(0));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_echo_without_temp_id_is_collapsed_on_ack() {
        let mut c = convo();
        c.insert_pending(TempId(7), "hello".into(), MessageKind::Text, Utc::now());
        c.apply_inbound(&from_bob("b1", 1));
        c.apply_inbound(&from_me("m1", None));
        assert_eq!(c.len(), 3);

        assert_eq!(c.reconcile(TempId(7), &from_me("m1", None)), Applied::Reconciled(0));
        assert_eq!(c.len(), 2);
        assert_eq!(c.messages()[0].id(), Some(&MessageId::from("m1")));
        assert_eq!(c.messages()[1].id(), Some(&MessageId::from("b1")));
    }

    #[test]
    fn test_failed_then_retried_under_new_temp_id() {
        let mut c = convo();
        c.insert_pending(TempId(1), "hello".into(), MessageKind::Text, Utc::now());
        c.apply_inbound(&from_bob("b1", 1));

        assert!(c.fail(TempId(1), "timeout"));
        assert!(!c.fail(TempId(1), "again"));
        assert_eq!(c.messages()[0].state(), DeliveryState::Failed);

        let resend = c.retry(TempId(1), TempId(2)).unwrap();
        assert_eq!(resend, ("hello".to_string(), MessageKind::Text));
        assert_eq!(c.messages()[0].temp_id(), Some(TempId(2)));
        assert_eq!(c.messages()[0].state(), DeliveryState::Pending);

        // The retired tempId no longer matches anything.
        assert_eq!(c.reconcile(TempId(1), &from_me("late", None)), Applied::Unknown);
        assert!(c.retry(TempId(2), TempId(3)).is_none());
    }

    #[test]
    fn test_late_ack_heals_failed_entry() {
        let mut c = convo();
        c.insert_pending(TempId(1), "hello".into(), MessageKind::Text, Utc::now());
        c.fail(TempId(1), "timeout");

        assert_eq!(c.reconcile(TempId(1), &from_me("m1", None)), Applied::Reconciled(0));
        assert_eq!(c.messages()[0].state(), DeliveryState::Sent);
    }

    #[test]
    fn test_inbound_duplicate_by_id() {
        let mut c = convo();
        assert_eq!(c.apply_inbound(&from_bob("b1", 1)), Applied::Appended(0));
        assert_eq!(c.apply_inbound(&from_bob("b1", 1)), Applied::Duplicate(0));
        assert_eq!(c.len(), 1);
        assert_eq!(c.unread(), 1);
    }

    #[test]
    fn test_backfill_prepends_in_order_and_skips_overlap() {
        let mut c = convo();
        c.apply_inbound(&from_bob("b5", 5));

        let page = c.begin_backfill().unwrap();
        assert_eq!(page, 1);
        assert_eq!(c.begin_backfill(), Err(BackfillOutcome::InFlight));

        let outcome = c.finish_backfill(
            page,
            HistoryPage {
                // Newest first, overlapping the live message.
                messages: vec![from_bob("b5", 5), from_bob("b4", 4), from_bob("b3", 3)],
                has_more: false,
            },
        );

        assert_eq!(outcome, BackfillOutcome::Loaded { added: 2, has_more: false });
        let ids: Vec<_> = c.messages().iter().map(|m| m.id().unwrap().0.clone()).collect();
        assert_eq!(ids, vec!["b3", "b4", "b5"]);
        assert_eq!(c.begin_backfill(), Err(BackfillOutcome::Exhausted));

        // Index survived the prepend.
        assert_eq!(c.apply_inbound(&from_bob("b4", 4)), Applied::Duplicate(1));
    }

    #[test]
    fn test_backfill_never_reorders_pending_entries() {
        let mut c = convo();
        c.insert_pending(TempId(9), "hello".into(), MessageKind::Text, Utc::now());
        let page = c.begin_backfill().unwrap();
        c.finish_backfill(
            page,
            HistoryPage {
                messages: vec![from_bob("b1", 1)],
                has_more: true,
            },
        );

        assert_eq!(c.messages()[1].temp_id(), Some(TempId(9)));
        assert_eq!(
            c.reconcile(TempId(9), &from_me("m9", None)),
            Applied::Reconciled(1)
        );
        assert_eq!(c.begin_backfill(), Ok(2));
    }

    #[test]
    fn test_read_receipt_flips_outbound_only() {
        let mut c = convo();
        c.apply_inbound(&from_bob("b1", 1));
        c.insert_pending(TempId(1), "hi".into(), MessageKind::Text, Utc::now());
        c.reconcile(TempId(1), &from_me("m1", None));

        assert_eq!(c.apply_read_receipt(&UserId::from("carol")), 0);
        assert_eq!(c.apply_read_receipt(&bob()), 1);
        assert!(c.messages()[1].read_by_peer);
        assert!(!c.messages()[0].read_by_peer);
    }

    #[test]
    fn test_mark_read_local_zeroes_unread() {
        let mut c = convo();
        c.apply_inbound(&from_bob("b1", 1));
        c.apply_inbound(&from_bob("b2", 2));
        assert_eq!(c.mark_read_local(), 2);
        assert_eq!(c.unread(), 0);
    }

    #[test]
    fn test_typing_flag_expires() {
        let mut c = convo();
        let now = Instant::now();
        c.set_typing(bob(), true, now + Duration::from_secs(6));

        assert_eq!(c.typing_user(now), Some(&bob()));
        assert_eq!(c.typing_user(now + Duration::from_secs(7)), None);

        c.set_typing(bob(), false, now);
        assert_eq!(c.typing_user(now), None);
    }

    #[test]
    fn test_foreign_record_is_not_owned() {
        let c = convo();
        let mut other = from_bob("x1", 1);
        other.sender = UserRef::Id(UserId::from("carol"));
        assert!(!c.owns(&other));
        assert!(c.owns(&from_bob("b1", 1)));
    }
}
