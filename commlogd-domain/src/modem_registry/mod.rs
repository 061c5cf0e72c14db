//! Registry of known radio modems and the mobile-data usage policy.
//!
//! Tracks each modem's SIM identity, registration status and roaming
//! permission, and answers whether data use is currently permitted for a
//! modem. Policy flips that newly prohibit data are broadcast so the MMS
//! lifecycle can cancel in-flight transactions.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::shared_types::{Identity, ModemPath, RegistrationStatus};

/// One known modem.
#[derive(Debug, Clone, Default)]
struct Modem {
    /// `None` until the SIM reports ready.
    subscriber_identity: Option<Identity>,
    status: RegistrationStatus,
    roaming_allowed: bool,
}

/// Data-policy change events consumed by the MMS lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// Data use on this modem just became prohibited. The lifecycle must
    /// cancel every pending transaction for it; cancelled transactions are
    /// never auto-retried.
    DataProhibited { modem: ModemPath },
}

/// All registry state lives behind one lock; every operation takes it
/// exactly once, so no ordering between locks can arise.
#[derive(Debug, Default)]
struct RegistryState {
    modems: HashMap<ModemPath, Modem>,
    /// External "always ask before roaming" policy flag, treated
    /// conservatively as prohibited.
    ask_roaming: bool,
    default_voice_modem: Option<ModemPath>,
}

impl RegistryState {
    /// Data is prohibited for an unknown modem (default deny), when roaming
    /// without permission, or when roaming is permitted only via the
    /// "always ask" policy.
    fn prohibited(&self, path: &ModemPath) -> bool {
        let Some(modem) = self.modems.get(path) else {
            return true;
        };
        if modem.status != RegistrationStatus::Roaming {
            return false;
        }
        if !modem.roaming_allowed {
            return true;
        }
        // "Always ask" is treated like "never": nobody is there to answer.
        self.ask_roaming
    }
}

pub struct ModemRegistry {
    state: RwLock<RegistryState>,
    policy_tx: broadcast::Sender<PolicyEvent>,
}

impl ModemRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        let (policy_tx, _) = broadcast::channel(broadcast_capacity);
        Self {
            state: RwLock::new(RegistryState::default()),
            policy_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.policy_tx.subscribe()
    }

    pub async fn add_modem(&self, path: ModemPath) {
        let mut state = self.state.write().await;
        if state.modems.contains_key(&path) {
            return;
        }
        debug!(modem = %path, "adding modem");
        state.modems.insert(path, Modem::default());
    }

    pub async fn remove_modem(&self, path: &ModemPath) {
        debug!(modem = %path, "removing modem");
        self.state.write().await.modems.remove(path);
    }

    /// Replaces the whole modem set, used when the radio stack comes and
    /// goes as a whole.
    pub async fn set_all_modems(&self, paths: Vec<ModemPath>) {
        let mut state = self.state.write().await;
        state.modems.retain(|path, _| paths.contains(path));
        for path in paths {
            state.modems.entry(path).or_default();
        }
    }

    pub async fn on_subscriber_identity_changed(&self, path: &ModemPath, imsi: Option<Identity>) {
        if let Some(modem) = self.state.write().await.modems.get_mut(path) {
            modem.subscriber_identity = imsi;
        }
    }

    pub async fn on_status_changed(&self, path: &ModemPath, status: RegistrationStatus) {
        let newly_prohibited = {
            let mut state = self.state.write().await;
            let before = state.prohibited(path);
            match state.modems.get_mut(path) {
                Some(modem) => modem.status = status,
                None => return,
            }
            !before && state.prohibited(path)
        };
        debug!(modem = %path, ?status, "registration status changed");
        if newly_prohibited {
            self.emit_prohibited(path);
        }
    }

    pub async fn on_roaming_allowed_changed(&self, path: &ModemPath, allowed: bool) {
        let newly_prohibited = {
            let mut state = self.state.write().await;
            let before = state.prohibited(path);
            match state.modems.get_mut(path) {
                Some(modem) => modem.roaming_allowed = allowed,
                None => return,
            }
            !before && state.prohibited(path)
        };
        debug!(modem = %path, allowed, "roaming permission changed");
        if newly_prohibited {
            self.emit_prohibited(path);
        }
    }

    /// Flipping the ask-roaming policy can prohibit data on every modem
    /// that is roaming with permission; each one gets its own event.
    pub async fn set_ask_roaming(&self, ask: bool) {
        let newly_prohibited: Vec<ModemPath> = {
            let mut state = self.state.write().await;
            let paths: Vec<ModemPath> = state.modems.keys().cloned().collect();
            let before: Vec<bool> = paths.iter().map(|path| state.prohibited(path)).collect();
            state.ask_roaming = ask;
            paths
                .into_iter()
                .zip(before)
                .filter(|(path, was)| !*was && state.prohibited(path))
                .map(|(path, _)| path)
                .collect()
        };
        for path in newly_prohibited {
            self.emit_prohibited(&path);
        }
    }

    pub async fn on_default_voice_modem_changed(&self, modem: Option<ModemPath>) {
        debug!(?modem, "default voice modem changed");
        self.state.write().await.default_voice_modem = modem;
    }

    pub async fn is_data_prohibited(&self, path: &ModemPath) -> bool {
        self.state.read().await.prohibited(path)
    }

    /// Read reports may only go out through a known modem with data allowed.
    pub async fn can_send_read_reports(&self, path: &ModemPath) -> bool {
        let state = self.state.read().await;
        state.modems.contains_key(path) && !state.prohibited(path)
    }

    /// The modem whose SIM carries the given subscriber identity.
    pub async fn modem_for_identity(&self, imsi: &Identity) -> Option<ModemPath> {
        self.state
            .read()
            .await
            .modems
            .iter()
            .find(|(_, modem)| modem.subscriber_identity.as_ref() == Some(imsi))
            .map(|(path, _)| path.clone())
    }

    pub async fn default_voice_modem(&self) -> Option<ModemPath> {
        self.state.read().await.default_voice_modem.clone()
    }

    pub async fn default_voice_identity(&self) -> Option<Identity> {
        let state = self.state.read().await;
        let path = state.default_voice_modem.as_ref()?;
        state
            .modems
            .get(path)
            .and_then(|modem| modem.subscriber_identity.clone())
    }

    fn emit_prohibited(&self, path: &ModemPath) {
        info!(modem = %path, "data use now prohibited");
        // No subscriber yet is fine; there is simply nothing to cancel.
        let _ = self.policy_tx.send(PolicyEvent::DataProhibited {
            modem: path.clone(),
        });
    }
}
