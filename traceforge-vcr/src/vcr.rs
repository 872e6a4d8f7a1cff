use std::collections::BTreeMap;
use traceforge_core::cassette::{Cassette, CassetteResponse};
use traceforge_core::error::GatewayError;

use crate::cassette_store::CassetteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcrMode {
    Off,
    Record,
    Replay,
    Auto,
    Strict,
}

impl VcrMode {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "record" => VcrMode::Record,
            "replay" => VcrMode::Replay,
            "auto" => VcrMode::Auto,
            "strict" => VcrMode::Strict,
            _ => VcrMode::Off,
        }
    }
}

/// The VCR layer (§4.8): entry decision (`should_replay`) and exit
/// decision (`record`), both driven purely by `mode` and cassette
/// presence/absence — no other state is consulted.
pub struct Vcr {
    store: CassetteStore,
    mode: VcrMode,
    secret: Option<String>,
}

impl Vcr {
    pub fn new(store: CassetteStore, mode: VcrMode, secret: Option<String>) -> Self {
        Self { store, mode, secret }
    }

    pub fn mode(&self) -> VcrMode {
        self.mode
    }

    /// Request-entry decision. `Ok(Some(cassette))` means replay verbatim
    /// without contacting the upstream; `Ok(None)` means dispatch
    /// upstream; `Err` surfaces a `vcr_miss`/`strict_miss` to the client.
    pub fn should_replay(&self, provider: &str, fingerprint: &str) -> Result<Option<Cassette>, GatewayError> {
        let found = self.store.find(provider, fingerprint, self.secret.as_deref())?;
        match self.mode {
            VcrMode::Off | VcrMode::Record => Ok(None),
            VcrMode::Replay => match found {
                Some(c) => Ok(Some(c)),
                None => Err(GatewayError::VcrMiss { fingerprint: fingerprint.to_string() }),
            },
            VcrMode::Auto => Ok(found),
            VcrMode::Strict => match found {
                Some(c) => Ok(Some(c)),
                None => Err(GatewayError::StrictMiss { fingerprint: fingerprint.to_string() }),
            },
        }
    }

    /// Response-exit decision. Persists the cassette when the mode calls
    /// for recording; a no-op in `off`/`replay`; a hard error in `strict`
    /// (recording is disallowed in CI).
    pub fn record(
        &self,
        provider: &str,
        fingerprint: &str,
        request: serde_json::Value,
        status: u16,
        headers: BTreeMap<String, String>,
        body: serde_json::Value,
    ) -> Result<(), GatewayError> {
        match self.mode {
            VcrMode::Off | VcrMode::Replay => Ok(()),
            VcrMode::Strict => Err(GatewayError::StrictRecordForbidden),
            VcrMode::Record | VcrMode::Auto => {
                let cassette = Cassette::new(provider, request, CassetteResponse { status, headers, body });
                self.store.save(provider, fingerprint, cassette, self.secret.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn vcr(mode: VcrMode, dir: &std::path::Path) -> Vcr {
        Vcr::new(CassetteStore::new(dir), mode, None)
    }

    #[test]
    fn off_mode_never_replays_or_records() {
        let dir = tempdir().unwrap();
        let v = vcr(VcrMode::Off, dir.path());
        assert!(v.should_replay("openai", "fp").unwrap().is_none());
        v.record("openai", "fp", json!({}), 200, Default::default(), json!({})).unwrap();
        assert!(v.should_replay("openai", "fp").unwrap().is_none());
    }

    #[test]
    fn record_mode_persists_and_replay_miss_is_an_error() {
        let dir = tempdir().unwrap();
        let record_vcr = vcr(VcrMode::Record, dir.path());
        assert!(record_vcr.should_replay("openai", "fp").unwrap().is_none());
        record_vcr
            .record("openai", "fp", json!({"model": "gpt-4"}), 200, Default::default(), json!({"ok": true}))
            .unwrap();

        let replay_vcr = vcr(VcrMode::Replay, dir.path());
        let replayed = replay_vcr.should_replay("openai", "fp").unwrap();
        assert!(replayed.is_some());

        let err = replay_vcr.should_replay("openai", "missing").unwrap_err();
        assert!(matches!(err, GatewayError::VcrMiss { .. }));
    }

    #[test]
    fn auto_mode_replays_when_present_and_dispatches_when_absent() {
        let dir = tempdir().unwrap();
        let v = vcr(VcrMode::Auto, dir.path());
        assert!(v.should_replay("openai", "fp").unwrap().is_none());
        v.record("openai", "fp", json!({}), 200, Default::default(), json!({})).unwrap();
        assert!(v.should_replay("openai", "fp").unwrap().is_some());
    }

    #[test]
    fn strict_mode_errors_on_miss_and_forbids_recording() {
        let dir = tempdir().unwrap();
        let v = vcr(VcrMode::Strict, dir.path());
        let err = v.should_replay("openai", "fp").unwrap_err();
        assert!(matches!(err, GatewayError::StrictMiss { .. }));

        let record_err = v.record("openai", "fp", json!({}), 200, Default::default(), json!({})).unwrap_err();
        assert!(matches!(record_err, GatewayError::StrictRecordForbidden));
    }

    #[test]
    fn strict_mode_replays_an_existing_cassette() {
        let dir = tempdir().unwrap();
        vcr(VcrMode::Record, dir.path())
            .record("openai", "fp", json!({}), 200, Default::default(), json!({"ok": true}))
            .unwrap();
        let strict_vcr = vcr(VcrMode::Strict, dir.path());
        assert!(strict_vcr.should_replay("openai", "fp").unwrap().is_some());
    }
}
