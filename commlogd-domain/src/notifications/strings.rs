//! User-visible notification texts and labels.

pub const MESSAGING_GROUP: &str = "Messages";
pub const MISSED_CALLS_GROUP: &str = "Missed calls";
pub const VOICEMAIL_GROUP: &str = "Voicemail";

pub const PRIVATE_NUMBER: &str = "Private number";
pub const GROUP_CHAT: &str = "Group chat";

pub const MANUAL_DOWNLOAD: &str = "Tap to download multimedia message";
pub const DOWNLOAD_FAILED: &str = "Problem with downloading multimedia message";
pub const SEND_FAILED: &str = "Problem with sending multimedia message";

pub const REPLY: &str = "Reply";
pub const CALL: &str = "Call";
pub const CALL_BACK: &str = "Call back";
pub const SEND_MESSAGE: &str = "Send message";

pub const VOICEMAIL_PROMPT: &str = "Call voicemail";

pub fn missed_calls(count: u32) -> String {
    if count <= 1 {
        "Missed call".to_string()
    } else {
        format!("{count} missed calls")
    }
}

pub fn voicemails_waiting(count: u32) -> String {
    if count <= 1 {
        "New voicemail".to_string()
    } else {
        format!("{count} new voicemails")
    }
}

pub fn new_vcard(label: &str) -> String {
    format!("Contact card received: {label}")
}

fn attachments(count: usize) -> String {
    if count == 1 {
        "1 attachment".to_string()
    } else {
        format!("{count} attachments")
    }
}

pub fn mms_attachments(count: usize) -> String {
    format!("Multimedia message, {}", attachments(count))
}

pub fn mms_with_text(count: usize, text: &str) -> String {
    format!("{text} ({})", attachments(count))
}
