//! Notification reconciliation.
//!
//! Owns the set of live notification records, queues records behind contact
//! resolution, collapses missed calls and voicemail, suppresses banners for
//! conversations the UI is currently showing, and evicts records the user
//! has observed. Publishing goes through the `NotificationSink` port; the
//! records themselves are snapshotted into the sink entries and restored at
//! startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::actions::{remote_actions, voicemail_waiting_actions};
use super::errors::NotificationError;
use super::strings;
use super::types::{
    sink_category, EventCollection, PersonalNotification, HIDDEN_ADDRESS,
    VOICEMAIL_WAITING_CATEGORY,
};
use crate::event::Event;
use crate::ports::{
    ContactResolver, FeedbackEvent, FeedbackPlayer, NotificationSink, SinkNotification,
};
use crate::shared_types::{ChatType, CueId, EventKind, EventStatus, GroupId, Recipient, SinkId};

/// Seam between the MMS lifecycle and the dispatcher, mockable in tests.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show_notification(
        &self,
        event: &Event,
        channel_target_id: &str,
        chat_type: ChatType,
        details: Option<&str>,
    );
}

/// One pre-existing sink entry handed to [`NotificationDispatcher::sync_notifications`].
#[derive(Debug, Clone)]
pub struct SinkEntry {
    pub id: SinkId,
    pub category: String,
    pub snapshot: Option<String>,
}

#[derive(Default)]
struct DispatcherState {
    notifications: Vec<PersonalNotification>,
    unresolved: Vec<PersonalNotification>,
    observed_conversations: Vec<(Recipient, ChatType)>,
    inbox_observed: bool,
    /// A feedback cue currently playing; re-armed on completion only.
    active_cue: Option<CueId>,
    voicemail_waiting_id: Option<SinkId>,
    group_names: HashMap<GroupId, String>,
}

pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    resolver: Arc<dyn ContactResolver>,
    feedback: Arc<dyn FeedbackPlayer>,
    state: Mutex<DispatcherState>,
}

impl NotificationDispatcher {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        resolver: Arc<dyn ContactResolver>,
        feedback: Arc<dyn FeedbackPlayer>,
    ) -> Self {
        Self {
            sink,
            resolver,
            feedback,
            state: Mutex::new(DispatcherState::default()),
        }
    }

    /// Snapshot of the live record set, for tests and introspection.
    pub async fn live_records(&self) -> Vec<PersonalNotification> {
        self.state.lock().await.notifications.clone()
    }

    /// Records queued behind contact resolution.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.unresolved.len()
    }

    /// Entry point for qualifying store events. `channel_target_id` is the
    /// conversation channel (equal to the remote address for peer-to-peer).
    pub async fn show_notification(
        &self,
        event: &Event,
        channel_target_id: &str,
        chat_type: ChatType,
        details: Option<&str>,
    ) {
        debug!(?event.id, channel_target_id, ?chat_type, "show notification");
        let mut state = self.state.lock().await;

        if event.kind.is_message()
            && (state.inbox_observed || is_observed(&state, event, channel_target_id, chat_type))
        {
            // The user is already looking at it; just one short cue, and no
            // new one until the previous cue finished.
            if state.active_cue.is_none() {
                let cue = match event.kind {
                    EventKind::Sms | EventKind::Mms => FeedbackEvent::Sms,
                    _ => FeedbackEvent::Chat,
                };
                match self.feedback.play(cue).await {
                    Ok(id) => state.active_cue = Some(id),
                    Err(err) => warn!(%err, "failed to play feedback cue"),
                }
            }
            return;
        }

        let text = notification_text(event, details);

        // An edited/updated version of an already-notified message amends
        // the existing record instead of creating a new one. Calls and
        // voicemail collapse by address below, never by token.
        if event.kind.is_message() && !event.message_token.is_empty() {
            if let Some(pn) = state
                .unresolved
                .iter_mut()
                .find(|pn| pn.event_token == event.message_token)
            {
                pn.notification_text = text;
                pn.pending = true;
                return;
            }
            let found = state
                .notifications
                .iter()
                .position(|pn| pn.event_token == event.message_token);
            if let Some(index) = found {
                state.notifications[index].notification_text = text;
                state.notifications[index].pending = true;
                if let Err(err) = self.publish(&mut state.notifications[index]).await {
                    warn!(%err, "failed to republish edited notification");
                }
                return;
            }
        }

        let chat_name = match chat_type {
            ChatType::PeerToPeer => String::new(),
            ChatType::Unnamed | ChatType::Room => event
                .group_id
                .and_then(|group| state.group_names.get(&group))
                .map(|name| {
                    if name.is_empty() {
                        strings::GROUP_CHAT.to_string()
                    } else {
                        name.clone()
                    }
                })
                .unwrap_or_default(),
        };

        // Missed calls and voicemail collapse into one running-count record
        // per remote address.
        if matches!(event.kind, EventKind::Call | EventKind::Voicemail) {
            let recipient = event.recipient();
            if let Some(pn) = state
                .unresolved
                .iter_mut()
                .find(|pn| pn.event_kind == event.kind && pn.recipient().matches(&recipient))
            {
                amend_collapsed(pn, event, &text);
                return;
            }
            let found = state
                .notifications
                .iter()
                .position(|pn| pn.event_kind == event.kind && pn.recipient().matches(&recipient));
            if let Some(index) = found {
                amend_collapsed(&mut state.notifications[index], event, &text);
                if let Err(err) = self.publish(&mut state.notifications[index]).await {
                    warn!(%err, "failed to republish collapsed notification");
                }
                return;
            }
        }

        let mut pn = PersonalNotification::new(
            event.remote_uid.clone(),
            event.local_uid.clone(),
            event.kind,
            channel_target_id,
            chat_type,
        );
        pn.notification_text = text;
        pn.chat_name = chat_name;
        pn.event_token = event.message_token.clone();
        pn.sms_replace_number = event.sms_replace_number.clone().unwrap_or_default();

        self.resolve_notification(&mut state, pn).await;
    }

    /// Contact resolution finished for everything queued; publish the whole
    /// batch together so no half-resolved set flickers through the sink.
    pub async fn on_contacts_resolved(&self) {
        let mut state = self.state.lock().await;
        let queued = std::mem::take(&mut state.unresolved);
        debug!(count = queued.len(), "contacts resolved");
        for mut pn in queued {
            if let Some(info) = self.resolver.resolved_info(&pn.recipient()).await {
                pn.contact_name = info.display_name;
                pn.avatar_url = info.avatar_url.unwrap_or_default();
            }
            pn.pending = true;
            self.add_notification(&mut state, pn).await;
        }
    }

    /// Address-book data changed for some addresses; refresh live records.
    pub async fn on_contact_changed(&self, recipients: &[Recipient]) {
        let mut state = self.state.lock().await;
        for index in 0..state.notifications.len() {
            let recipient = state.notifications[index].recipient();
            if !recipients.iter().any(|r| r.matches(&recipient)) {
                continue;
            }
            let info = self.resolver.resolved_info(&recipient).await;
            let pn = &mut state.notifications[index];
            match info {
                Some(info) => {
                    pn.contact_name = info.display_name;
                    pn.avatar_url = info.avatar_url.unwrap_or_default();
                }
                None => {
                    pn.contact_name.clear();
                    pn.avatar_url.clear();
                }
            }
            pn.pending = true;
            if let Err(err) = self.publish(&mut state.notifications[index]).await {
                warn!(%err, "failed to republish after contact change");
            }
        }
    }

    pub async fn on_feedback_finished(&self, cue: CueId) {
        let mut state = self.state.lock().await;
        if state.active_cue == Some(cue) {
            state.active_cue = None;
        }
    }

    /// Removes every record of the given kinds on one account.
    pub async fn remove_notifications(&self, account: &str, kinds: &[EventKind]) {
        debug!(account, ?kinds, "removing notifications by account");
        let mut state = self.state.lock().await;
        self.evict(&mut state, |pn| {
            pn.account == account && kinds.contains(&pn.event_kind)
        })
        .await;
    }

    /// Removes message-kind records for one conversation.
    pub async fn remove_conversation_notifications(
        &self,
        recipient: &Recipient,
        chat_type: ChatType,
    ) {
        let mut state = self.state.lock().await;
        self.evict(&mut state, |pn| {
            pn.collection() == EventCollection::Messaging
                && pn.chat_type == chat_type
                && if chat_type == ChatType::PeerToPeer {
                    recipient.matches(&pn.recipient())
                } else {
                    recipient.matches(&Recipient::new(pn.account.clone(), pn.target_id.clone()))
                }
        })
        .await;
    }

    /// Removes every record of the given kinds regardless of account.
    pub async fn remove_notification_types(&self, kinds: &[EventKind]) {
        debug!(?kinds, "removing notification types");
        let mut state = self.state.lock().await;
        self.evict(&mut state, |pn| kinds.contains(&pn.event_kind)).await;
    }

    /// The inbox view opened or closed. Opening it evicts message records;
    /// with an account filter active only that account's records go.
    pub async fn on_inbox_observed_changed(&self, observed: bool, filter_account: &str) {
        self.state.lock().await.inbox_observed = observed;
        if !observed {
            return;
        }
        let kinds = [
            EventKind::Im,
            EventKind::Sms,
            EventKind::Mms,
            EventKind::VoicemailSms,
        ];
        if filter_account.is_empty() {
            self.remove_notification_types(&kinds).await;
        } else {
            self.remove_notifications(filter_account, &kinds).await;
        }
    }

    pub async fn on_call_history_observed_changed(&self, observed: bool) {
        if observed {
            self.remove_notification_types(&[EventKind::Call]).await;
        }
    }

    /// The set of conversations currently open in the UI changed. Matching
    /// records are evicted; new events for them are suppressed.
    pub async fn on_observed_conversations_changed(
        &self,
        conversations: Vec<(Recipient, ChatType)>,
    ) {
        self.state.lock().await.observed_conversations = conversations.clone();
        for (recipient, chat_type) in conversations {
            self.remove_conversation_notifications(&recipient, chat_type)
                .await;
        }
    }

    /// A conversation group was renamed: rewrite the chat name on its live
    /// records. An emptied name falls back to the generic label.
    pub async fn on_group_data_changed(
        &self,
        group_id: GroupId,
        group_recipient: &Recipient,
        chat_name: &str,
    ) {
        let mut state = self.state.lock().await;
        state.group_names.insert(group_id, chat_name.to_string());

        for index in 0..state.notifications.len() {
            let pn = &mut state.notifications[index];
            if pn.chat_name.is_empty() || pn.account != group_recipient.local_uid {
                continue;
            }
            if !group_recipient.matches(&Recipient::new(pn.account.clone(), pn.target_id.clone())) {
                continue;
            }
            let new_name = if chat_name.is_empty() && pn.chat_name != strings::GROUP_CHAT {
                strings::GROUP_CHAT.to_string()
            } else if chat_name != pn.chat_name && !chat_name.is_empty() {
                chat_name.to_string()
            } else {
                continue;
            };
            debug!(group_id, %new_name, "group chat renamed");
            pn.chat_name = new_name;
            pn.pending = true;
            if let Err(err) = self.publish(&mut state.notifications[index]).await {
                warn!(%err, "failed to republish after group rename");
            }
        }
    }

    pub async fn on_group_removed(
        &self,
        group_id: GroupId,
        group_recipient: &Recipient,
        chat_type: ChatType,
    ) {
        self.state.lock().await.group_names.remove(&group_id);
        self.remove_conversation_notifications(group_recipient, chat_type)
            .await;
    }

    /// Restores daemon state from the sink entries that survived a restart.
    /// Entries with an unparseable snapshot are closed; the rest re-enter
    /// contact resolution.
    pub async fn sync_notifications(&self, entries: Vec<SinkEntry>) {
        let mut state = self.state.lock().await;
        for entry in entries {
            if entry.category == VOICEMAIL_WAITING_CATEGORY {
                state.voicemail_waiting_id = Some(entry.id);
                continue;
            }
            let restored = entry
                .snapshot
                .as_deref()
                .and_then(PersonalNotification::restore);
            match restored {
                Some(mut pn) => {
                    pn.sink_id = Some(entry.id);
                    self.resolve_notification(&mut state, pn).await;
                }
                None => {
                    debug!(sink_id = entry.id, "discarding unrestorable sink entry");
                    if let Err(err) = self.sink.close(entry.id).await {
                        warn!(sink_id = entry.id, %err, "failed to close stale sink entry");
                    }
                }
            }
        }
    }

    /// Maintains the single voicemail-waiting entry. The radio sometimes
    /// reports zero waiting messages while the flag is set; display 1 then.
    pub async fn on_voicemail_waiting_changed(
        &self,
        waiting: bool,
        message_count: u32,
        mailbox: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        if !waiting {
            if let Some(id) = state.voicemail_waiting_id.take() {
                debug!(sink_id = id, "closing voicemail waiting notification");
                if let Err(err) = self.sink.close(id).await {
                    warn!(sink_id = id, %err, "failed to close voicemail waiting entry");
                }
            }
            return;
        }

        let count = message_count.max(1);
        let summary = strings::voicemails_waiting(count);
        let notification = SinkNotification {
            app_name: strings::VOICEMAIL_GROUP.to_string(),
            category: VOICEMAIL_WAITING_CATEGORY.to_string(),
            summary: summary.clone(),
            body: String::new(),
            icon: String::new(),
            item_count: count,
            timestamp: Utc::now(),
            snapshot: None,
            remote_actions: voicemail_waiting_actions(mailbox),
            replaces_id: state.voicemail_waiting_id,
            preview_summary: Some(summary),
            preview_body: Some(strings::VOICEMAIL_PROMPT.to_string()),
        };
        match self.sink.publish(&notification).await {
            Ok(id) => state.voicemail_waiting_id = Some(id),
            Err(err) => warn!(%err, "failed to publish voicemail waiting entry"),
        }
    }

    async fn resolve_notification(
        &self,
        state: &mut DispatcherState,
        mut pn: PersonalNotification,
    ) {
        if pn.remote_uid == HIDDEN_ADDRESS || !pn.chat_name.is_empty() {
            self.add_notification(state, pn).await;
            return;
        }
        if let Some(info) = self.resolver.resolved_info(&pn.recipient()).await {
            pn.contact_name = info.display_name;
            pn.avatar_url = info.avatar_url.unwrap_or_default();
            self.add_notification(state, pn).await;
            return;
        }

        debug!(account = %pn.account, remote = %pn.remote_uid, "queueing for contact resolution");
        let recipient = pn.recipient();
        state.unresolved.push(pn);
        if let Err(err) = self.resolver.request(recipient).await {
            warn!(%err, "failed to request contact resolution");
        }
    }

    async fn add_notification(&self, state: &mut DispatcherState, mut pn: PersonalNotification) {
        if pn.pending {
            if let Err(err) = self.publish(&mut pn).await {
                warn!(%err, "failed to publish notification");
            }
        }
        state.notifications.push(pn);
    }

    async fn publish(&self, pn: &mut PersonalNotification) -> Result<(), NotificationError> {
        // Voicemail entries carry the group name only, never a contact.
        let summary = if pn.collection() == EventCollection::Voicemail {
            String::new()
        } else {
            pn.notification_name()
        };
        let body = pn.notification_text.clone();

        // Missed calls update their count silently, without a banner.
        let (preview_summary, preview_body) = if pn.collection() == EventCollection::Voice {
            (None, None)
        } else {
            (Some(summary.clone()), Some(body.clone()))
        };

        let notification = SinkNotification {
            app_name: pn.collection().group_name().to_string(),
            category: sink_category(pn.event_kind).to_string(),
            summary,
            body,
            icon: pn.avatar_url.clone(),
            item_count: pn.item_count.max(1),
            timestamp: pn.timestamp,
            snapshot: pn.snapshot(),
            remote_actions: remote_actions(pn),
            replaces_id: pn.sink_id,
            preview_summary,
            preview_body,
        };

        let id = self.sink.publish(&notification).await?;
        pn.sink_id = Some(id);
        pn.pending = false;
        debug!(sink_id = id, category = sink_category(pn.event_kind), "published");
        Ok(())
    }

    async fn evict<F>(&self, state: &mut DispatcherState, matches: F)
    where
        F: Fn(&PersonalNotification) -> bool,
    {
        let mut closed = Vec::new();
        state.notifications.retain(|pn| {
            if matches(pn) {
                if let Some(id) = pn.sink_id {
                    closed.push(id);
                }
                false
            } else {
                true
            }
        });
        // Queued-but-unresolved records for the same criterion are dropped
        // before they ever publish.
        state.unresolved.retain(|pn| !matches(pn));

        for id in closed {
            if let Err(err) = self.sink.close(id).await {
                warn!(sink_id = id, %err, "failed to close sink entry");
            }
        }
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn show_notification(
        &self,
        event: &Event,
        channel_target_id: &str,
        chat_type: ChatType,
        details: Option<&str>,
    ) {
        NotificationDispatcher::show_notification(self, event, channel_target_id, chat_type, details)
            .await;
    }
}

fn is_observed(
    state: &DispatcherState,
    event: &Event,
    channel_target_id: &str,
    chat_type: ChatType,
) -> bool {
    if !event.kind.is_message() {
        return false;
    }
    let remote_match = if chat_type == ChatType::PeerToPeer {
        event.remote_uid.as_str()
    } else {
        channel_target_id
    };
    let message_recipient = Recipient::new(event.local_uid.clone(), remote_match);
    state
        .observed_conversations
        .iter()
        .any(|(recipient, ct)| recipient.matches(&message_recipient) && *ct == chat_type)
}

fn amend_collapsed(pn: &mut PersonalNotification, event: &Event, text: &str) {
    pn.event_token = event.message_token.clone();
    pn.item_count = pn.item_count.max(1) + 1;
    pn.timestamp = Utc::now();
    pn.notification_text = if event.kind == EventKind::Call {
        strings::missed_calls(pn.item_count)
    } else {
        text.to_string()
    };
    pn.pending = true;
}

/// Builds the body text for one store event.
pub fn notification_text(event: &Event, details: Option<&str>) -> String {
    match event.kind {
        EventKind::Im | EventKind::Sms | EventKind::VoicemailSms => {
            match &event.from_vcard_label {
                Some(label) if !label.is_empty() => strings::new_vcard(label),
                _ => event.free_text.clone(),
            }
        }
        EventKind::Mms => mms_notification_text(event, details),
        EventKind::Call => strings::missed_calls(1),
        // The store supplies the "N voicemails" text for voicemail events.
        EventKind::Voicemail => event.free_text.clone(),
    }
}

fn mms_notification_text(event: &Event, details: Option<&str>) -> String {
    if event.status == EventStatus::ManualNotification {
        return strings::MANUAL_DOWNLOAD.to_string();
    }
    if event.status.is_failed() {
        let trimmed = details.map(str::trim).unwrap_or_default();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        return match event.direction {
            crate::shared_types::Direction::Inbound => strings::DOWNLOAD_FAILED.to_string(),
            crate::shared_types::Direction::Outbound => strings::SEND_FAILED.to_string(),
        };
    }

    let text = if !event.subject.is_empty() {
        event.subject.clone()
    } else {
        event.free_text.clone()
    };
    let attachments = event.attachment_count();
    if attachments == 0 {
        text
    } else if text.is_empty() {
        strings::mms_attachments(attachments)
    } else {
        strings::mms_with_text(attachments, &text)
    }
}
