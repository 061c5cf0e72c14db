//! The MMS transaction lifecycle state machine.
//!
//! Drives an inbound message through notification → download → completion
//! and an outbound one through send → sent → delivery/read report,
//! correlating transport callbacks with stored events and honoring the
//! data-usage policy. Every callback re-fetches the stored record before
//! mutating it; the UI side updates events concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::errors::MmsError;
use super::parts::PartStorage;
use super::transactions::TransactionTable;
use crate::event::Event;
use crate::modem_registry::ModemRegistry;
use crate::notifications::Notifier;
use crate::ports::{EventStore, IdentitySettings, TransportEngine, TransportPart};
use crate::shared_types::{
    ChatType, DeliveryStatus, Direction, EventId, EventKind, EventStatus, GroupId, Identity,
    ModemPath, ReadReportSendStatus, ReadStatus, ReceiveState, SendState,
};

pub struct MmsLifecycle {
    store: Arc<dyn EventStore>,
    transport: Arc<dyn TransportEngine>,
    settings: Arc<dyn IdentitySettings>,
    registry: Arc<ModemRegistry>,
    notifier: Arc<dyn Notifier>,
    parts: PartStorage,
    transactions: Mutex<TransactionTable>,
}

impl MmsLifecycle {
    pub fn new(
        store: Arc<dyn EventStore>,
        transport: Arc<dyn TransportEngine>,
        settings: Arc<dyn IdentitySettings>,
        registry: Arc<ModemRegistry>,
        notifier: Arc<dyn Notifier>,
        parts: PartStorage,
    ) -> Self {
        Self {
            store,
            transport,
            settings,
            registry,
            notifier,
            parts,
            transactions: Mutex::new(TransactionTable::new()),
        }
    }

    /// Event ids currently in flight for a modem. Test and introspection
    /// helper; the table itself stays private.
    pub async fn tracked_transactions(&self, modem: &ModemPath) -> Vec<EventId> {
        self.transactions.lock().await.tracked(modem)
    }

    /// An MMS push notification arrived. Persists the notification event
    /// and either dispatches the download or surfaces a manual-download
    /// notification, depending on policy and preferences. Returns the event
    /// id only when a download was dispatched (the transport engine uses it
    /// as its record id).
    pub async fn message_notification(
        &self,
        imsi: Identity,
        from: &str,
        subject: &str,
        expiry: Option<u32>,
        push_data: Vec<u8>,
    ) -> Result<Option<EventId>, MmsError> {
        let modem = self.registry.modem_for_identity(&imsi).await;
        let account = modem
            .as_ref()
            .map(ModemPath::account_path)
            .unwrap_or_else(|| ModemPath::new("").account_path());
        debug!(%imsi, ?modem, %account, "MMS notification received");

        let prohibited = match &modem {
            Some(path) => self.registry.is_data_prohibited(path).await,
            None => true,
        };
        // The default action is to download automatically.
        let manual = prohibited || !self.settings.auto_download(&imsi).await;
        debug!(manual, "manual download decision");

        let mut event = Event::new(EventKind::Mms, Direction::Inbound);
        event.local_uid = account;
        event.remote_uid = from.to_string();
        event.subject = subject.to_string();
        event.subscriber_identity = Some(imsi);
        event.expiry = expiry;
        event.push_data = Some(push_data);
        event.status = if manual {
            EventStatus::ManualNotification
        } else {
            EventStatus::Waiting
        };

        if let Err(err) = self.store.ensure_group(&mut event).await {
            error!(%err, "failed to handle group for MMS notification event; message dropped");
            return Err(err.into());
        }
        let id = match self.store.add_event(&mut event).await {
            Ok(id) => id,
            Err(err) => {
                error!(%err, "failed to save MMS notification event; message dropped");
                return Err(err.into());
            }
        };

        if manual {
            // Surface a notification when a manual download is needed.
            self.notifier
                .show_notification(&event, from, ChatType::PeerToPeer, None)
                .await;
            Ok(None)
        } else {
            if let Some(modem) = modem {
                self.transactions.lock().await.track(modem, id);
            }
            Ok(Some(id))
        }
    }

    /// Transport progress callback for an inbound transfer.
    pub async fn message_receive_state_changed(&self, event_id: EventId, state: ReceiveState) {
        let Some(mut event) = self.fetch_event(event_id).await else {
            warn!(event_id, "ignoring MMS receive state for unknown event");
            self.transactions.lock().await.untrack_everywhere(event_id);
            return;
        };

        let new_status = match state {
            ReceiveState::Deferred => EventStatus::Waiting,
            ReceiveState::Receiving | ReceiveState::Decoding => EventStatus::Downloading,
            ReceiveState::NoSpace | ReceiveState::RecvError => {
                // A cancelled receive call may still report errors; never
                // overwrite the manual-notification state with them.
                if event.status == EventStatus::ManualNotification {
                    return;
                }
                EventStatus::TemporarilyFailed
            }
            ReceiveState::Garbage => EventStatus::PermanentlyFailed,
        };

        if new_status == event.status {
            return;
        }
        event.status = new_status;
        if let Err(err) = self.store.modify_event(&event).await {
            warn!(event_id, %err, "failed updating MMS event status");
        }

        if new_status != EventStatus::Waiting && new_status != EventStatus::Downloading {
            self.transactions.lock().await.untrack_everywhere(event_id);
            self.notifier
                .show_notification(&event, &event.remote_uid.clone(), ChatType::PeerToPeer, None)
                .await;
        }
    }

    /// Full message content arrived. Merges the final fields, moves the
    /// event to the right conversation if the sender address changed, and
    /// copies all parts into durable storage before marking it received.
    #[allow(clippy::too_many_arguments)]
    pub async fn message_received(
        &self,
        event_id: EventId,
        mms_id: &str,
        from: &str,
        to: Vec<String>,
        cc: Vec<String>,
        subject: &str,
        date: DateTime<Utc>,
        read_report: bool,
        parts: &[TransportPart],
    ) {
        self.transactions.lock().await.untrack_everywhere(event_id);

        let mut event = match self.fetch_event(event_id).await {
            Some(event) => event,
            None => {
                // Defensive fallback for a race the transport layer can
                // produce; the notification record has vanished, so the
                // message is rehomed under the default voice identity.
                error!(
                    event_id,
                    "messageReceived for unknown event; creating one under the default voice account"
                );
                let account = self
                    .registry
                    .default_voice_modem()
                    .await
                    .map(|m| m.account_path())
                    .unwrap_or_else(|| ModemPath::new("").account_path());
                let mut event = Event::new(EventKind::Mms, Direction::Inbound);
                event.local_uid = account;
                event.remote_uid = from.to_string();
                if let Err(err) = self.store.ensure_group(&mut event).await {
                    error!(%err, "failed to handle group for MMS received event; message dropped");
                    return;
                }
                event
            }
        };

        event.subject = subject.to_string();
        event.start_time = date;
        event.mms_id = mms_id.to_string();
        event.to = to;
        event.cc = cc;
        event.report_read = read_report;
        event.status = EventStatus::Received;

        // Expiry and push data have served their purpose; the subscriber
        // identity is kept only while a read report may still be owed.
        event.expiry = None;
        event.push_data = None;
        if !read_report {
            event.subscriber_identity = None;
        }

        // The notification stage may have seen a different sender address;
        // rehome the event into the right conversation group.
        if event.remote_uid != from {
            let old_group = event.group_id;
            event.remote_uid = from.to_string();
            if let Err(err) = self.store.ensure_group(&mut event).await {
                error!(%err, "failed handling group for MMS received event");
            }
            if let (Some(id), Some(new_group)) = (event.id, event.group_id) {
                if old_group != Some(new_group) {
                    if let Err(err) = self.store.move_event(id, new_group).await {
                        error!(event_id = id, ?old_group, new_group, %err,
                            "failed moving MMS received event between groups");
                    }
                }
            }
        }

        // Without a matching notification, save first to get an event id
        // for the part files.
        let id = match event.id {
            Some(id) => id,
            None => match self.store.add_event(&mut event).await {
                Ok(id) => id,
                Err(err) => {
                    error!(%err, "failed adding MMS received event; message dropped");
                    return;
                }
            },
        };

        match self.parts.collect_parts(id, parts) {
            Ok((stored, free_text)) => {
                event.message_parts = stored.clone();
                event.free_text = free_text;
                if let Err(err) = self.store.modify_event(&event).await {
                    error!(event_id = id, %err, "failed updating MMS received event");
                    self.parts.rollback(&stored);
                    self.fail_received_event(id, from).await;
                    return;
                }
            }
            Err((stored, err)) => {
                error!(event_id = id, %err, "failed copying message parts to storage");
                self.parts.rollback(&stored);
                self.fail_received_event(id, from).await;
                return;
            }
        }

        self.notifier
            .show_notification(&event, from, ChatType::PeerToPeer, None)
            .await;
        debug!(event_id = id, parts = event.message_parts.len(), "message received");
    }

    /// Part persistence failed: reload the stored record (to avoid wiping
    /// concurrent updates), mark it temporarily failed and notify.
    async fn fail_received_event(&self, event_id: EventId, from: &str) {
        let Some(mut event) = self.fetch_event(event_id).await else {
            return;
        };
        event.status = EventStatus::TemporarilyFailed;
        if let Err(err) = self.store.modify_event(&event).await {
            warn!(event_id, %err, "failed to mark received event as failed");
        }
        self.notifier
            .show_notification(&event, from, ChatType::PeerToPeer, None)
            .await;
    }

    /// Sends a new outbound message. Multi-recipient sends are rejected up
    /// front, before anything is persisted.
    pub async fn send_message(
        &self,
        to: Vec<String>,
        cc: Vec<String>,
        bcc: Vec<String>,
        subject: &str,
        parts: &[TransportPart],
    ) -> Result<EventId, MmsError> {
        // Group conversations are not supported yet.
        let recipients = to.len() + cc.len() + bcc.len();
        if recipients > 1 {
            error!(recipients, "ignoring outgoing group MMS; not implemented");
            return Err(MmsError::GroupMessageUnsupported { recipients });
        }
        let Some(primary) = to.first().cloned() else {
            return Err(MmsError::NoRecipients);
        };

        let account = self
            .registry
            .default_voice_modem()
            .await
            .map(|m| m.account_path())
            .unwrap_or_else(|| ModemPath::new("").account_path());

        let mut event = Event::new(EventKind::Mms, Direction::Outbound);
        event.local_uid = account;
        event.remote_uid = primary;
        event.subject = subject.to_string();
        event.status = EventStatus::Sending;
        event.is_read = true;
        event.to = to;
        event.cc = cc;
        event.bcc = bcc;

        if let Err(err) = self.store.ensure_group(&mut event).await {
            error!(%err, "failed to handle group for MMS send event; message dropped");
            return Err(err.into());
        }
        // Persist first to obtain a stable event id for the part files.
        let id = match self.store.add_event(&mut event).await {
            Ok(id) => id,
            Err(err) => {
                error!(%err, "failed adding outgoing MMS event");
                return Err(err.into());
            }
        };

        match self.parts.collect_parts(id, parts) {
            Ok((stored, free_text)) => {
                event.message_parts = stored.clone();
                event.free_text = free_text;
                if let Err(err) = self.store.modify_event(&event).await {
                    error!(event_id = id, %err, "failed modifying outgoing MMS event");
                    self.parts.rollback(&stored);
                    self.fail_outgoing_event(id, EventStatus::PermanentlyFailed).await;
                    return Ok(id);
                }
            }
            Err((stored, err)) => {
                error!(event_id = id, %err, "failed copying outgoing message parts");
                self.parts.rollback(&stored);
                self.fail_outgoing_event(id, EventStatus::PermanentlyFailed).await;
                return Ok(id);
            }
        }

        let prohibited = match self.registry.default_voice_modem().await {
            Some(modem) => self.registry.is_data_prohibited(&modem).await,
            None => true,
        };
        if prohibited {
            warn!(event_id = id, "refusing to send MMS due to data roaming restrictions");
            self.fail_outgoing_event(id, EventStatus::TemporarilyFailed).await;
            return Ok(id);
        }

        self.dispatch_from_event(&mut event).await;
        Ok(id)
    }

    /// Re-sends a previously failed outbound message (user action).
    pub async fn send_message_from_event(&self, event_id: EventId) {
        let Some(mut event) = self.fetch_event(event_id).await else {
            error!(event_id, "ignoring sendMessageFromEvent for unknown event");
            return;
        };
        if event.kind != EventKind::Mms || event.direction != Direction::Outbound {
            error!(event_id, "ignoring sendMessageFromEvent with irrelevant event");
            return;
        }
        if event.recipient_count() < 1 {
            error!(event_id, "ignoring sendMessageFromEvent with no recipients");
            return;
        }
        if event.message_parts.is_empty() {
            error!(event_id, "ignoring sendMessageFromEvent with no parts");
            return;
        }

        if event.status != EventStatus::Sending {
            event.status = EventStatus::Sending;
            if let Err(err) = self.store.modify_event(&event).await {
                warn!(event_id, %err, "failed resetting event to sending");
            }
        }
        self.dispatch_from_event(&mut event).await;
    }

    /// Hands the persisted outbound event to the transport engine, tracking
    /// the transaction. A dispatch error marks the event temporarily failed
    /// and notifies; on success the engine-assigned identity is recorded
    /// for later delivery/read-report routing.
    async fn dispatch_from_event(&self, event: &mut Event) {
        let Some(id) = event.id else {
            error!("dispatch requested for unsaved event");
            return;
        };

        let imsi = match event.subscriber_identity.clone() {
            Some(imsi) => imsi,
            None => self
                .registry
                .default_voice_identity()
                .await
                .unwrap_or_else(|| Identity::new("")),
        };
        let flags = self.settings.send_flags(&imsi).await;
        debug!(event_id = id, %imsi, flags, "dispatching outbound MMS");

        let modem = match self.registry.modem_for_identity(&imsi).await {
            Some(modem) => Some(modem),
            None => self.registry.default_voice_modem().await,
        };
        if let Some(modem) = modem {
            self.transactions.lock().await.track(modem, id);
        }

        let transport_parts: Vec<TransportPart> = event
            .message_parts
            .iter()
            .map(|part| TransportPart {
                file_name: part.path.clone(),
                content_type: part.content_type.clone(),
                content_id: part.content_id.clone(),
            })
            .collect();

        match self
            .transport
            .send_message(
                id,
                &imsi,
                &event.to,
                &event.cc,
                &event.bcc,
                &event.subject,
                flags,
                &transport_parts,
            )
            .await
        {
            Ok(assigned) => {
                event.subscriber_identity = Some(assigned);
                if let Err(err) = self.store.modify_event(event).await {
                    error!(event_id = id, %err, "failed recording outbound reference");
                }
            }
            Err(err) => {
                error!(event_id = id, %err, "transport engine rejected sendMessage");
                self.transactions.lock().await.untrack_everywhere(id);
                self.fail_outgoing_event(id, EventStatus::TemporarilyFailed).await;
            }
        }
    }

    /// Re-fetches, marks failed and notifies about an outbound event.
    async fn fail_outgoing_event(&self, event_id: EventId, status: EventStatus) {
        let Some(mut event) = self.fetch_event(event_id).await else {
            return;
        };
        event.status = status;
        if let Err(err) = self.store.modify_event(&event).await {
            warn!(event_id, %err, "failed to mark outgoing event as failed");
        }
        self.notifier
            .show_notification(&event, &event.remote_uid.clone(), ChatType::PeerToPeer, None)
            .await;
    }

    /// Transport progress callback for an outbound transfer.
    pub async fn message_send_state_changed(
        &self,
        event_id: EventId,
        state: SendState,
        details: Option<&str>,
    ) {
        debug!(event_id, ?state, ?details, "send state changed");
        let Some(mut event) = self.fetch_event(event_id).await else {
            warn!(event_id, "ignoring MMS send state for unknown event");
            self.transactions.lock().await.untrack_everywhere(event_id);
            return;
        };

        let new_status = match state {
            SendState::Encoding | SendState::Sending | SendState::Deferred => EventStatus::Sending,
            SendState::TooBig | SendState::NoSpace | SendState::SendError => {
                EventStatus::TemporarilyFailed
            }
            SendState::Refused => EventStatus::PermanentlyFailed,
        };

        if new_status == event.status {
            return;
        }
        event.status = new_status;
        if let Err(err) = self.store.modify_event(&event).await {
            warn!(event_id, %err, "failed updating MMS event status");
        }

        if new_status != EventStatus::Sending {
            self.transactions.lock().await.untrack_everywhere(event_id);
            self.notifier
                .show_notification(&event, &event.remote_uid.clone(), ChatType::PeerToPeer, details)
                .await;
        }
    }

    /// The engine finished sending; records the correlation token used by
    /// later delivery and read reports.
    pub async fn message_sent(&self, event_id: EventId, mms_id: &str) {
        self.transactions.lock().await.untrack_everywhere(event_id);

        let Some(mut event) = self.fetch_event(event_id).await else {
            warn!(event_id, "ignoring MMS sent state for unknown event");
            return;
        };
        event.status = EventStatus::Sent;
        event.mms_id = mms_id.to_string();
        if let Err(err) = self.store.modify_event(&event).await {
            warn!(event_id, %err, "failed updating MMS event sent status");
        }
    }

    /// Delivery report for a sent message, matched by correlation token
    /// only; per-recipient reports are intentionally not disambiguated.
    pub async fn delivery_report(
        &self,
        imsi: Identity,
        mms_id: &str,
        _recipient: &str,
        status: DeliveryStatus,
    ) {
        let Some(mut event) = self.fetch_event_by_token(mms_id).await else {
            warn!(mms_id, "ignoring MMS delivery state for unknown event");
            return;
        };

        event.subscriber_identity = Some(imsi);
        match status {
            DeliveryStatus::Expired | DeliveryStatus::Rejected | DeliveryStatus::Unrecognized => {
                event.status = EventStatus::TemporarilyFailed;
            }
            DeliveryStatus::Retrieved => {
                event.status = EventStatus::Delivered;
            }
            DeliveryStatus::Indeterminate | DeliveryStatus::Deferred | DeliveryStatus::Forwarded => {
                // Deliberately left without a state change.
            }
        }

        if let Err(err) = self.store.modify_event(&event).await {
            warn!(mms_id, %err, "failed updating MMS event delivery status");
        }
    }

    /// The other party read (or deleted) our sent message. Independent of
    /// the main status machine.
    pub async fn read_report(
        &self,
        imsi: Identity,
        mms_id: &str,
        _recipient: &str,
        status: ReadStatus,
    ) {
        let Some(mut event) = self.fetch_event_by_token(mms_id).await else {
            warn!(mms_id, "ignoring MMS read state for unknown event");
            return;
        };

        event.subscriber_identity = Some(imsi);
        event.read_status = status;
        if let Err(err) = self.store.modify_event(&event).await {
            warn!(mms_id, %err, "failed updating MMS event read status");
        }
    }

    /// Completion of our own outgoing read report. Only a transient error
    /// keeps the pending-ack marker (the subscriber identity) for a retry
    /// driven by the next "message read" signal; every other outcome is
    /// terminal for the marker.
    pub async fn read_report_send_status(&self, event_id: EventId, status: ReadReportSendStatus) {
        debug!(event_id, ?status, "read report send status");
        if status == ReadReportSendStatus::TransientError {
            return;
        }
        let Some(mut event) = self.fetch_event(event_id).await else {
            warn!(event_id, "ignoring read report completion for unknown event");
            return;
        };
        event.subscriber_identity = None;
        if let Err(err) = self.store.modify_event(&event).await {
            warn!(event_id, %err, "failed to clear read-report marker");
        }
    }

    /// Store change stream: updated events. Sends read reports for messages
    /// the user just read, where policy and preferences allow.
    pub async fn on_events_updated(&self, events: &[Event]) {
        debug!(count = events.len(), "events updated");
        for event in events {
            if !wants_read_report(event) {
                continue;
            }
            let Some(imsi) = event.subscriber_identity.clone() else {
                continue;
            };
            let Some(modem) = self.registry.modem_for_identity(&imsi).await else {
                debug!(?event.id, "cannot send read report; identity has no modem");
                continue;
            };
            if self.registry.can_send_read_reports(&modem).await {
                self.event_marked_as_read(event).await;
            } else {
                debug!(?event.id, "cannot send read report at the moment");
            }
        }
    }

    /// Store change stream: updated groups. Covers bulk "mark conversation
    /// read" operations that do not surface per-event updates.
    pub async fn on_groups_updated(&self, groups: &[GroupId]) {
        debug!(count = groups.len(), "groups updated");
        for &group in groups {
            let events = match self.store.events_awaiting_read_report(group).await {
                Ok(events) => events,
                Err(err) => {
                    warn!(group, %err, "failed to query MMS events in group");
                    continue;
                }
            };
            debug!(group, count = events.len(), "MMS events awaiting read report");
            for event in &events {
                if !wants_read_report(event) {
                    continue;
                }
                let Some(imsi) = event.subscriber_identity.clone() else {
                    continue;
                };
                let Some(modem) = self.registry.modem_for_identity(&imsi).await else {
                    continue;
                };
                if self.registry.can_send_read_reports(&modem).await {
                    self.event_marked_as_read(event).await;
                } else {
                    debug!(?event.id, "cannot send read report at the moment");
                }
            }
        }
    }

    /// A message was marked read locally; either sends the read report or
    /// clears the pending-ack marker when the preference forbids sending.
    async fn event_marked_as_read(&self, event: &Event) {
        let (Some(id), Some(imsi)) = (event.id, event.subscriber_identity.clone()) else {
            return;
        };

        if self.settings.send_read_reports(&imsi).await {
            debug!(event_id = id, "sending read report");
            if let Err(err) = self
                .transport
                .send_read_report(id, &imsi, &event.mms_id, &event.remote_uid, ReadStatus::Read)
                .await
            {
                // The marker stays; the next "message read" signal retries.
                warn!(event_id = id, %err, "failed to dispatch read report");
            }
        } else {
            debug!(event_id = id, "not allowed to send read report");
            let mut event = event.clone();
            event.subscriber_identity = None;
            if let Err(err) = self.store.modify_event(&event).await {
                warn!(event_id = id, %err, "failed to clear read-report marker");
            }
        }
    }

    /// Data use became prohibited on a modem: abort every pending
    /// transaction for it. Cancelled transactions are never auto-retried
    /// by this daemon.
    pub async fn on_data_policy_changed(&self, modem: &ModemPath) {
        if !self.registry.is_data_prohibited(modem).await {
            return;
        }
        let cancelled = self.transactions.lock().await.cancel_all(modem);
        if cancelled.is_empty() {
            return;
        }
        info!(
            modem = %modem,
            count = cancelled.len(),
            "cancelling active MMS events due to roaming restrictions"
        );
        for id in cancelled {
            if let Err(err) = self.transport.cancel(id).await {
                warn!(event_id = id, %err, "failed to cancel MMS transaction");
            }
        }
    }

    async fn fetch_event(&self, id: EventId) -> Option<Event> {
        match self.store.get_event(id).await {
            Ok(event) => event,
            Err(err) => {
                warn!(event_id = id, %err, "event store lookup failed");
                None
            }
        }
    }

    async fn fetch_event_by_token(&self, mms_id: &str) -> Option<Event> {
        match self.store.get_event_by_token(mms_id).await {
            Ok(event) => event,
            Err(err) => {
                warn!(mms_id, %err, "event store token lookup failed");
                None
            }
        }
    }
}

/// Whether a stored event still owes the sender a read report.
pub fn wants_read_report(event: &Event) -> bool {
    event.kind == EventKind::Mms
        && event.direction == Direction::Inbound
        && event.status == EventStatus::Received
        && event.report_read
        && event.is_read
        && event.subscriber_identity.is_some()
        && !event.mms_id.is_empty()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use commlogd_core::config::StorageConfig;

    use super::*;
    use crate::notifications::Notifier;
    use crate::ports::{EventStoreError, IdentitySettings, TransportError};
    use crate::shared_types::RegistrationStatus;

    #[derive(Default)]
    struct MockStore {
        next_event_id: AtomicI64,
        next_group_id: AtomicI64,
        events: StdMutex<HashMap<EventId, Event>>,
        groups: StdMutex<HashMap<String, GroupId>>,
        adds: AtomicUsize,
        moves: StdMutex<Vec<(EventId, GroupId)>>,
    }

    impl MockStore {
        fn event(&self, id: EventId) -> Event {
            self.events.lock().unwrap().get(&id).cloned().unwrap()
        }

        fn insert(&self, event: Event) {
            self.events
                .lock()
                .unwrap()
                .insert(event.id.unwrap(), event);
        }
    }

    #[async_trait]
    impl EventStore for MockStore {
        async fn add_event(&self, event: &mut Event) -> Result<EventId, EventStoreError> {
            let id = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
            event.id = Some(id);
            self.adds.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().insert(id, event.clone());
            Ok(id)
        }

        async fn modify_event(&self, event: &Event) -> Result<(), EventStoreError> {
            let id = event
                .id
                .ok_or_else(|| EventStoreError::Storage("unsaved event".to_string()))?;
            self.events.lock().unwrap().insert(id, event.clone());
            Ok(())
        }

        async fn get_event(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
            Ok(self.events.lock().unwrap().get(&id).cloned())
        }

        async fn get_event_by_token(&self, mms_id: &str) -> Result<Option<Event>, EventStoreError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .values()
                .find(|event| event.mms_id == mms_id)
                .cloned())
        }

        async fn ensure_group(&self, event: &mut Event) -> Result<GroupId, EventStoreError> {
            let mut groups = self.groups.lock().unwrap();
            let group = *groups
                .entry(event.remote_uid.clone())
                .or_insert_with(|| self.next_group_id.fetch_add(1, Ordering::SeqCst) + 100);
            event.group_id = Some(group);
            Ok(group)
        }

        async fn move_event(&self, id: EventId, group: GroupId) -> Result<(), EventStoreError> {
            self.moves.lock().unwrap().push((id, group));
            if let Some(event) = self.events.lock().unwrap().get_mut(&id) {
                event.group_id = Some(group);
            }
            Ok(())
        }

        async fn events_awaiting_read_report(
            &self,
            group: GroupId,
        ) -> Result<Vec<Event>, EventStoreError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .values()
                .filter(|event| event.group_id == Some(group) && wants_read_report(event))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MockTransport {
        fail_send: AtomicBool,
        sends: StdMutex<Vec<EventId>>,
        read_reports: StdMutex<Vec<(EventId, ReadStatus)>>,
        cancels: StdMutex<Vec<EventId>>,
    }

    #[async_trait]
    impl TransportEngine for MockTransport {
        async fn send_message(
            &self,
            event_id: EventId,
            _imsi: &Identity,
            _to: &[String],
            _cc: &[String],
            _bcc: &[String],
            _subject: &str,
            _flags: u32,
            _parts: &[TransportPart],
        ) -> Result<Identity, TransportError> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(TransportError::Transient("engine unavailable".to_string()));
            }
            self.sends.lock().unwrap().push(event_id);
            Ok(Identity::new("ENGINE-IMSI"))
        }

        async fn send_read_report(
            &self,
            event_id: EventId,
            _imsi: &Identity,
            _mms_id: &str,
            _recipient: &str,
            status: ReadStatus,
        ) -> Result<(), TransportError> {
            self.read_reports.lock().unwrap().push((event_id, status));
            Ok(())
        }

        async fn cancel(&self, event_id: EventId) -> Result<(), TransportError> {
            self.cancels.lock().unwrap().push(event_id);
            Ok(())
        }
    }

    struct MockSettings {
        auto_download: AtomicBool,
        send_read_reports: AtomicBool,
    }

    impl Default for MockSettings {
        fn default() -> Self {
            Self {
                auto_download: AtomicBool::new(true),
                send_read_reports: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl IdentitySettings for MockSettings {
        async fn auto_download(&self, _imsi: &Identity) -> bool {
            self.auto_download.load(Ordering::SeqCst)
        }

        async fn send_read_reports(&self, _imsi: &Identity) -> bool {
            self.send_read_reports.load(Ordering::SeqCst)
        }

        async fn send_flags(&self, _imsi: &Identity) -> u32 {
            0
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        shown: StdMutex<Vec<(Option<EventId>, EventStatus)>>,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn show_notification(
            &self,
            event: &Event,
            _channel_target_id: &str,
            _chat_type: ChatType,
            _details: Option<&str>,
        ) {
            self.shown.lock().unwrap().push((event.id, event.status));
        }
    }

    struct Fixture {
        store: Arc<MockStore>,
        transport: Arc<MockTransport>,
        settings: Arc<MockSettings>,
        registry: Arc<ModemRegistry>,
        notifier: Arc<MockNotifier>,
        lifecycle: MmsLifecycle,
        _tmp: tempfile::TempDir,
    }

    const MODEM: &str = "/ril_0";

    async fn fixture() -> Fixture {
        let store = Arc::new(MockStore::default());
        let transport = Arc::new(MockTransport::default());
        let settings = Arc::new(MockSettings::default());
        let notifier = Arc::new(MockNotifier::default());
        let registry = Arc::new(ModemRegistry::new(8));

        registry.add_modem(ModemPath::new(MODEM)).await;
        registry
            .on_subscriber_identity_changed(&ModemPath::new(MODEM), Some(Identity::new("IMSI1")))
            .await;
        registry
            .on_status_changed(&ModemPath::new(MODEM), RegistrationStatus::Home)
            .await;
        registry
            .on_default_voice_modem_changed(Some(ModemPath::new(MODEM)))
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let lifecycle = MmsLifecycle::new(
            store.clone() as Arc<dyn EventStore>,
            transport.clone() as Arc<dyn TransportEngine>,
            settings.clone() as Arc<dyn IdentitySettings>,
            registry.clone(),
            notifier.clone() as Arc<dyn Notifier>,
            PartStorage::new(StorageConfig::new(tmp.path().join("parts"))),
        );

        Fixture {
            store,
            transport,
            settings,
            registry,
            notifier,
            lifecycle,
            _tmp: tmp,
        }
    }

    fn spool_part(dir: &Path, name: &str, content: &str, content_type: &str) -> TransportPart {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        TransportPart {
            file_name: path,
            content_type: content_type.to_string(),
            content_id: name.to_string(),
        }
    }

    async fn notify(f: &Fixture) -> Option<EventId> {
        f.lifecycle
            .message_notification(Identity::new("IMSI1"), "+358501234567", "Holiday", Some(3600), vec![1, 2, 3])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn manual_download_when_auto_download_disabled() {
        let f = fixture().await;
        f.settings.auto_download.store(false, Ordering::SeqCst);

        let id = notify(&f).await;
        assert_eq!(id, None);

        let event = f.store.event(1);
        assert_eq!(event.status, EventStatus::ManualNotification);
        assert!(f
            .lifecycle
            .tracked_transactions(&ModemPath::new(MODEM))
            .await
            .is_empty());
        assert_eq!(
            *f.notifier.shown.lock().unwrap(),
            vec![(Some(1), EventStatus::ManualNotification)]
        );
    }

    #[tokio::test]
    async fn automatic_download_tracks_transaction() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();

        let event = f.store.event(id);
        assert_eq!(event.status, EventStatus::Waiting);
        assert_eq!(event.subscriber_identity, Some(Identity::new("IMSI1")));
        assert_eq!(
            f.lifecycle.tracked_transactions(&ModemPath::new(MODEM)).await,
            vec![id]
        );
        assert!(f.notifier.shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn receive_state_transitions() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();

        f.lifecycle
            .message_receive_state_changed(id, ReceiveState::Receiving)
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::Downloading);

        f.lifecycle
            .message_receive_state_changed(id, ReceiveState::Deferred)
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::Waiting);

        f.lifecycle
            .message_receive_state_changed(id, ReceiveState::RecvError)
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::TemporarilyFailed);
        assert!(f
            .lifecycle
            .tracked_transactions(&ModemPath::new(MODEM))
            .await
            .is_empty());
        assert_eq!(f.notifier.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_manual_download_is_not_overwritten_by_late_errors() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();

        let mut event = f.store.event(id);
        event.status = EventStatus::ManualNotification;
        f.store.insert(event);

        f.lifecycle
            .message_receive_state_changed(id, ReceiveState::NoSpace)
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::ManualNotification);
        assert!(f.notifier.shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn garbage_payload_fails_permanently() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();
        f.lifecycle
            .message_receive_state_changed(id, ReceiveState::Garbage)
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::PermanentlyFailed);
    }

    #[tokio::test]
    async fn unknown_receive_state_is_untracked_defensively() {
        let f = fixture().await;
        f.lifecycle
            .message_receive_state_changed(999, ReceiveState::Receiving)
            .await;
        assert!(f.notifier.shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_received_persists_parts_and_notifies() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();
        let spool = f._tmp.path().join("spool");
        let parts = vec![
            spool_part(&spool, "msg.txt", "hello there", "text/plain"),
            spool_part(&spool, "photo.jpg", "jpegdata", "image/jpeg"),
        ];

        f.lifecycle
            .message_received(
                id,
                "mms-token-1",
                "+358501234567",
                vec!["+358507654321".to_string()],
                vec![],
                "Holiday",
                Utc::now(),
                false,
                &parts,
            )
            .await;

        let event = f.store.event(id);
        assert_eq!(event.status, EventStatus::Received);
        assert_eq!(event.mms_id, "mms-token-1");
        assert_eq!(event.message_parts.len(), 2);
        assert_eq!(event.free_text, "hello there");
        assert_eq!(event.expiry, None);
        assert_eq!(event.push_data, None);
        // No read report requested, so the routing marker is dropped.
        assert_eq!(event.subscriber_identity, None);
        assert!(f
            .lifecycle
            .tracked_transactions(&ModemPath::new(MODEM))
            .await
            .is_empty());
        assert_eq!(f.notifier.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn part_copy_failure_rolls_back_and_fails_temporarily() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();
        let spool = f._tmp.path().join("spool");
        let parts = vec![
            spool_part(&spool, "ok.txt", "fine", "text/plain"),
            TransportPart {
                file_name: spool.join("missing.jpg"),
                content_type: "image/jpeg".to_string(),
                content_id: "missing".to_string(),
            },
        ];

        f.lifecycle
            .message_received(
                id,
                "mms-token-1",
                "+358501234567",
                vec![],
                vec![],
                "",
                Utc::now(),
                false,
                &parts,
            )
            .await;

        let event = f.store.event(id);
        assert_eq!(event.status, EventStatus::TemporarilyFailed);
        assert!(event.message_parts.is_empty());
        let part_dir = f._tmp.path().join("parts").join(id.to_string());
        assert!(!part_dir.join("ok.txt").exists());
        assert_eq!(f.notifier.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn changed_sender_moves_event_to_new_group() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();
        let old_group = f.store.event(id).group_id.unwrap();

        f.lifecycle
            .message_received(
                id,
                "mms-token-1",
                "+358509999999",
                vec![],
                vec![],
                "",
                Utc::now(),
                false,
                &[],
            )
            .await;

        let event = f.store.event(id);
        assert_eq!(event.remote_uid, "+358509999999");
        let new_group = event.group_id.unwrap();
        assert_ne!(new_group, old_group);
        assert_eq!(*f.store.moves.lock().unwrap(), vec![(id, new_group)]);
    }

    #[tokio::test]
    async fn multi_recipient_send_is_rejected_before_any_store_write() {
        let f = fixture().await;
        let err = f
            .lifecycle
            .send_message(
                vec!["+358111".to_string(), "+358222".to_string()],
                vec![],
                vec![],
                "",
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MmsError::GroupMessageUnsupported { recipients: 2 }));
        assert_eq!(f.store.adds.load(Ordering::SeqCst), 0);

        let err = f
            .lifecycle
            .send_message(vec![], vec![], vec![], "", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MmsError::NoRecipients));
        assert_eq!(f.store.adds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_send_records_engine_identity() {
        let f = fixture().await;
        let spool = f._tmp.path().join("spool");
        let parts = vec![spool_part(&spool, "msg.txt", "hi", "text/plain")];

        let id = f
            .lifecycle
            .send_message(vec!["+358111".to_string()], vec![], vec![], "Hi", &parts)
            .await
            .unwrap();

        assert_eq!(*f.transport.sends.lock().unwrap(), vec![id]);
        let event = f.store.event(id);
        assert_eq!(event.status, EventStatus::Sending);
        assert!(event.is_read);
        assert_eq!(event.subscriber_identity, Some(Identity::new("ENGINE-IMSI")));
        assert_eq!(
            f.lifecycle.tracked_transactions(&ModemPath::new(MODEM)).await,
            vec![id]
        );
    }

    #[tokio::test]
    async fn prohibited_send_fails_without_reaching_transport() {
        let f = fixture().await;
        f.registry
            .on_status_changed(&ModemPath::new(MODEM), RegistrationStatus::Roaming)
            .await;
        let spool = f._tmp.path().join("spool");
        let parts = vec![spool_part(&spool, "msg.txt", "hi", "text/plain")];

        let id = f
            .lifecycle
            .send_message(vec!["+358111".to_string()], vec![], vec![], "", &parts)
            .await
            .unwrap();

        assert!(f.transport.sends.lock().unwrap().is_empty());
        assert_eq!(f.store.event(id).status, EventStatus::TemporarilyFailed);
        assert_eq!(f.notifier.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_rejection_fails_temporarily_and_notifies() {
        let f = fixture().await;
        f.transport.fail_send.store(true, Ordering::SeqCst);
        let spool = f._tmp.path().join("spool");
        let parts = vec![spool_part(&spool, "msg.txt", "hi", "text/plain")];

        let id = f
            .lifecycle
            .send_message(vec!["+358111".to_string()], vec![], vec![], "", &parts)
            .await
            .unwrap();

        assert_eq!(f.store.event(id).status, EventStatus::TemporarilyFailed);
        assert!(f
            .lifecycle
            .tracked_transactions(&ModemPath::new(MODEM))
            .await
            .is_empty());
        assert_eq!(f.notifier.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_states_and_sent_follow_the_table() {
        let f = fixture().await;
        let spool = f._tmp.path().join("spool");
        let parts = vec![spool_part(&spool, "msg.txt", "hi", "text/plain")];
        let id = f
            .lifecycle
            .send_message(vec!["+358111".to_string()], vec![], vec![], "", &parts)
            .await
            .unwrap();

        f.lifecycle
            .message_send_state_changed(id, SendState::Encoding, None)
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::Sending);

        f.lifecycle.message_sent(id, "mms-token-9").await;
        let event = f.store.event(id);
        assert_eq!(event.status, EventStatus::Sent);
        assert_eq!(event.mms_id, "mms-token-9");
        assert!(f
            .lifecycle
            .tracked_transactions(&ModemPath::new(MODEM))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn refused_send_fails_permanently_with_details() {
        let f = fixture().await;
        let spool = f._tmp.path().join("spool");
        let parts = vec![spool_part(&spool, "msg.txt", "hi", "text/plain")];
        let id = f
            .lifecycle
            .send_message(vec!["+358111".to_string()], vec![], vec![], "", &parts)
            .await
            .unwrap();

        f.lifecycle
            .message_send_state_changed(id, SendState::Refused, Some("message too old"))
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::PermanentlyFailed);
        assert_eq!(f.notifier.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn roaming_flip_cancels_tracked_transactions_exactly_once() {
        let f = fixture().await;
        let id = notify(&f).await.unwrap();
        let modem = ModemPath::new(MODEM);

        f.registry
            .on_status_changed(&modem, RegistrationStatus::Roaming)
            .await;
        f.lifecycle.on_data_policy_changed(&modem).await;

        assert_eq!(*f.transport.cancels.lock().unwrap(), vec![id]);
        assert!(f.lifecycle.tracked_transactions(&modem).await.is_empty());

        // A second policy event finds nothing left to cancel.
        f.lifecycle.on_data_policy_changed(&modem).await;
        assert_eq!(f.transport.cancels.lock().unwrap().len(), 1);
    }

    fn received_event(id: EventId, imsi: Option<&str>) -> Event {
        let mut event = Event::new(EventKind::Mms, Direction::Inbound);
        event.id = Some(id);
        event.remote_uid = "+358501234567".to_string();
        event.mms_id = format!("token-{id}");
        event.status = EventStatus::Received;
        event.report_read = true;
        event.is_read = true;
        event.subscriber_identity = imsi.map(Identity::new);
        event.group_id = Some(500);
        event
    }

    #[tokio::test]
    async fn delivery_reports_follow_the_table() {
        let f = fixture().await;
        let mut event = received_event(1, None);
        event.direction = Direction::Outbound;
        event.status = EventStatus::Sent;
        f.store.insert(event);

        f.lifecycle
            .delivery_report(Identity::new("IMSI1"), "token-1", "+358111", DeliveryStatus::Indeterminate)
            .await;
        assert_eq!(f.store.event(1).status, EventStatus::Sent);

        f.lifecycle
            .delivery_report(Identity::new("IMSI1"), "token-1", "+358111", DeliveryStatus::Retrieved)
            .await;
        assert_eq!(f.store.event(1).status, EventStatus::Delivered);

        f.lifecycle
            .delivery_report(Identity::new("IMSI1"), "token-1", "+358111", DeliveryStatus::Expired)
            .await;
        assert_eq!(f.store.event(1).status, EventStatus::TemporarilyFailed);
    }

    #[tokio::test]
    async fn remote_read_report_updates_read_status() {
        let f = fixture().await;
        let mut event = received_event(1, None);
        event.direction = Direction::Outbound;
        f.store.insert(event);

        f.lifecycle
            .read_report(Identity::new("IMSI1"), "token-1", "+358111", ReadStatus::Deleted)
            .await;
        assert_eq!(f.store.event(1).read_status, ReadStatus::Deleted);
    }

    #[tokio::test]
    async fn only_transient_errors_keep_the_read_report_marker() {
        let f = fixture().await;
        f.store.insert(received_event(1, Some("IMSI1")));
        f.store.insert(received_event(2, Some("IMSI1")));

        f.lifecycle
            .read_report_send_status(1, ReadReportSendStatus::TransientError)
            .await;
        assert_eq!(f.store.event(1).subscriber_identity, Some(Identity::new("IMSI1")));

        f.lifecycle
            .read_report_send_status(2, ReadReportSendStatus::Ok)
            .await;
        assert_eq!(f.store.event(2).subscriber_identity, None);
    }

    #[tokio::test]
    async fn marked_read_sends_report_when_preference_allows() {
        let f = fixture().await;
        f.settings.send_read_reports.store(true, Ordering::SeqCst);
        let event = received_event(1, Some("IMSI1"));
        f.store.insert(event.clone());

        f.lifecycle.on_events_updated(&[event]).await;
        assert_eq!(
            *f.transport.read_reports.lock().unwrap(),
            vec![(1, ReadStatus::Read)]
        );
    }

    #[tokio::test]
    async fn marked_read_clears_marker_when_preference_forbids() {
        let f = fixture().await;
        let event = received_event(1, Some("IMSI1"));
        f.store.insert(event.clone());

        f.lifecycle.on_events_updated(&[event]).await;
        assert!(f.transport.read_reports.lock().unwrap().is_empty());
        assert_eq!(f.store.event(1).subscriber_identity, None);
    }

    #[tokio::test]
    async fn group_update_drives_read_reports() {
        let f = fixture().await;
        f.settings.send_read_reports.store(true, Ordering::SeqCst);
        f.store.insert(received_event(1, Some("IMSI1")));

        f.lifecycle.on_groups_updated(&[500]).await;
        assert_eq!(
            *f.transport.read_reports.lock().unwrap(),
            vec![(1, ReadStatus::Read)]
        );
    }

    #[tokio::test]
    async fn read_reports_wait_while_data_is_prohibited() {
        let f = fixture().await;
        f.settings.send_read_reports.store(true, Ordering::SeqCst);
        f.registry
            .on_status_changed(&ModemPath::new(MODEM), RegistrationStatus::Roaming)
            .await;
        let event = received_event(1, Some("IMSI1"));
        f.store.insert(event.clone());

        f.lifecycle.on_events_updated(&[event]).await;
        // Neither sent nor cleared; the marker waits for a better moment.
        assert!(f.transport.read_reports.lock().unwrap().is_empty());
        assert_eq!(f.store.event(1).subscriber_identity, Some(Identity::new("IMSI1")));
    }

    #[tokio::test]
    async fn resend_validates_and_dispatches() {
        let f = fixture().await;
        let spool = f._tmp.path().join("spool");
        let parts = vec![spool_part(&spool, "msg.txt", "hi", "text/plain")];
        let id = f
            .lifecycle
            .send_message(vec!["+358111".to_string()], vec![], vec![], "", &parts)
            .await
            .unwrap();
        f.lifecycle
            .message_send_state_changed(id, SendState::SendError, None)
            .await;
        assert_eq!(f.store.event(id).status, EventStatus::TemporarilyFailed);

        f.lifecycle.send_message_from_event(id).await;
        assert_eq!(f.store.event(id).status, EventStatus::Sending);
        assert_eq!(f.transport.sends.lock().unwrap().len(), 2);
    }
}
