//! Remote-action sets attached to sink entries.
//!
//! Actions are pure data handed to the sink; the daemon never dispatches
//! them itself. The default/app slots open the relevant view, named slots
//! become buttons.

use serde_json::{json, Value};

use super::strings;
use super::types::{EventCollection, PersonalNotification};
use crate::ports::RemoteAction;

const MESSAGING_SERVICE: &str = "org.commlogd.Messaging";
const MESSAGING_PATH: &str = "/org/commlogd/Messaging";
const MESSAGING_INTERFACE: &str = "org.commlogd.Messaging";
const START_CONVERSATION_METHOD: &str = "startConversation";

const VOICECALL_SERVICE: &str = "org.commlogd.VoiceCall";
const VOICECALL_PATH: &str = "/org/commlogd/VoiceCall";
const VOICECALL_INTERFACE: &str = "org.commlogd.VoiceCall";
const VOICECALL_DIAL_METHOD: &str = "dial";

const CALL_HISTORY_SERVICE: &str = "org.commlogd.CallHistory";
const CALL_HISTORY_PATH: &str = "/org/commlogd/CallHistory";
const CALL_HISTORY_INTERFACE: &str = "org.commlogd.CallHistory";
const CALL_HISTORY_METHOD: &str = "showCallHistory";
const CALL_HISTORY_PARAMETER: &str = "calls";

const VOICEMAIL_PATH: &str = "/org/commlogd/Voicemail";
const VOICEMAIL_INTERFACE: &str = "org.commlogd.Voicemail";
const VOICEMAIL_METHOD: &str = "showVoicemail";

fn action(
    name: &str,
    label: &str,
    service: &str,
    path: &str,
    interface: &str,
    method: &str,
    arguments: Vec<Value>,
) -> RemoteAction {
    RemoteAction {
        name: name.to_string(),
        label: label.to_string(),
        service: service.to_string(),
        path: path.to_string(),
        interface: interface.to_string(),
        method: method.to_string(),
        arguments,
    }
}

fn start_conversation(pn: &PersonalNotification, name: &str, label: &str, reply: bool) -> RemoteAction {
    action(
        name,
        label,
        MESSAGING_SERVICE,
        MESSAGING_PATH,
        MESSAGING_INTERFACE,
        START_CONVERSATION_METHOD,
        vec![json!(pn.account), json!(pn.target_id), json!(reply)],
    )
}

fn dial(label: &str, number: &str) -> RemoteAction {
    action(
        "",
        label,
        VOICECALL_SERVICE,
        VOICECALL_PATH,
        VOICECALL_INTERFACE,
        VOICECALL_DIAL_METHOD,
        vec![json!(number)],
    )
}

fn show_call_history(slot: &str) -> RemoteAction {
    action(
        slot,
        "",
        CALL_HISTORY_SERVICE,
        CALL_HISTORY_PATH,
        CALL_HISTORY_INTERFACE,
        CALL_HISTORY_METHOD,
        vec![json!(CALL_HISTORY_PARAMETER)],
    )
}

fn show_voicemail(slot: &str) -> RemoteAction {
    action(
        slot,
        "",
        CALL_HISTORY_SERVICE,
        VOICEMAIL_PATH,
        VOICEMAIL_INTERFACE,
        VOICEMAIL_METHOD,
        Vec::new(),
    )
}

/// The action set for one notification record.
pub fn remote_actions(pn: &PersonalNotification) -> Vec<RemoteAction> {
    use crate::shared_types::EventKind;

    let mut actions = Vec::new();
    match pn.collection() {
        EventCollection::Messaging => {
            actions.push(start_conversation(pn, "default", "", false));

            if matches!(
                pn.event_kind,
                EventKind::Im | EventKind::Sms | EventKind::Mms
            ) && (pn.event_kind == EventKind::Im || pn.has_phone_number())
            {
                actions.push(start_conversation(pn, "", strings::REPLY, true));
            }
            if pn.has_phone_number() {
                actions.push(dial(strings::CALL, &pn.remote_uid));
            }
        }
        EventCollection::Voice => {
            actions.push(show_call_history("default"));
            actions.push(show_call_history("app"));
            if pn.remote_uid.chars().any(|c| c.is_ascii_digit()) {
                actions.push(dial(strings::CALL_BACK, &pn.remote_uid));
                actions.push(start_conversation(pn, "", strings::SEND_MESSAGE, true));
            }
        }
        EventCollection::Voicemail => {
            actions.push(show_voicemail("default"));
            actions.push(show_voicemail("app"));
        }
    }
    actions
}

/// Actions of the voicemail-waiting entry: dial the mailbox when its number
/// is known, otherwise fall back to call history.
pub fn voicemail_waiting_actions(mailbox: Option<&str>) -> Vec<RemoteAction> {
    match mailbox {
        Some(number) if !number.is_empty() => {
            let template = dial("", &format!("tel://{number}"));
            vec![
                RemoteAction {
                    name: "default".to_string(),
                    ..template.clone()
                },
                RemoteAction {
                    name: "app".to_string(),
                    ..template
                },
            ]
        }
        _ => vec![show_call_history("default"), show_call_history("app")],
    }
}
