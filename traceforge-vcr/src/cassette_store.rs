use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use traceforge_core::cassette::Cassette;
use traceforge_core::error::GatewayError;

use crate::signing;

/// `<root>/<provider>/<fingerprint>.json` cassette directory (§4.7, §6.4).
pub struct CassetteStore {
    root: PathBuf,
    nonce: AtomicU64,
}

impl CassetteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), nonce: AtomicU64::new(0) }
    }

    fn path_for(&self, provider: &str, fingerprint: &str) -> PathBuf {
        self.root.join(provider).join(format!("{fingerprint}.json"))
    }

    /// Look up a cassette. Returns `Ok(None)` on a plain miss; returns
    /// `Err(GatewayError::CassetteTamper)` if a present signature fails to
    /// verify against `secret`. A cassette with no `cassette_version` is
    /// treated as a miss rather than a parse error, per §4.7.
    pub fn find(
        &self,
        provider: &str,
        fingerprint: &str,
        secret: Option<&str>,
    ) -> Result<Option<Cassette>, GatewayError> {
        let path = self.path_for(provider, fingerprint);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GatewayError::Io(e)),
        };

        let cassette: Cassette = serde_json::from_slice(&raw)?;
        if !cassette.has_valid_version() {
            return Ok(None);
        }

        if let (Some(signature), Some(secret)) = (&cassette.signature, secret) {
            let _ = signature;
            let verified = signing::verify(&cassette, secret)?;
            if !verified {
                return Err(GatewayError::CassetteTamper { fingerprint: fingerprint.to_string() });
            }
        }

        Ok(Some(cassette))
    }

    /// Persist `cassette`, computing and attaching a signature when
    /// `secret` is provided. Writes replace atomically (temp + rename).
    pub fn save(
        &self,
        provider: &str,
        fingerprint: &str,
        mut cassette: Cassette,
        secret: Option<&str>,
    ) -> Result<(), GatewayError> {
        if let Some(secret) = secret {
            cassette.signature = Some(signing::sign(&cassette, secret)?);
        }

        let dir = self.root.join(provider);
        std::fs::create_dir_all(&dir)?;
        let path = self.path_for(provider, fingerprint);
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp.{nonce}"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&cassette)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// `(provider, cassette_count)` pairs by directory scan.
    pub fn stats(&self) -> Result<Vec<(String, usize)>, GatewayError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let provider = entry.file_name().to_string_lossy().to_string();
            let count = count_cassettes(&entry.path())?;
            out.push((provider, count));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

fn count_cassettes(dir: &Path) -> std::io::Result<usize> {
    let count = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .count();
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use traceforge_core::cassette::CassetteResponse;

    fn sample() -> Cassette {
        Cassette::new(
            "openai",
            json!({"model": "gpt-4"}),
            CassetteResponse { status: 200, headers: Default::default(), body: json!({"ok": true}) },
        )
    }

    #[test]
    fn save_then_find_round_trips() {
        let dir = tempdir().unwrap();
        let store = CassetteStore::new(dir.path());
        store.save("openai", "fp-1", sample(), None).unwrap();
        let found = store.find("openai", "fp-1", None).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn missing_cassette_is_a_plain_miss() {
        let dir = tempdir().unwrap();
        let store = CassetteStore::new(dir.path());
        assert!(store.find("openai", "does-not-exist", None).unwrap().is_none());
    }

    #[test]
    fn signed_cassette_verifies_with_correct_secret() {
        let dir = tempdir().unwrap();
        let store = CassetteStore::new(dir.path());
        store.save("openai", "fp-2", sample(), Some("s3cr3t")).unwrap();
        let found = store.find("openai", "fp-2", Some("s3cr3t")).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn tampered_cassette_surfaces_as_tamper_error_not_a_miss() {
        let dir = tempdir().unwrap();
        let store = CassetteStore::new(dir.path());
        store.save("openai", "fp-3", sample(), Some("s3cr3t")).unwrap();

        let path = dir.path().join("openai").join("fp-3.json");
        let mut on_disk: Cassette = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        on_disk.response.status = 500;
        std::fs::write(&path, serde_json::to_vec(&on_disk).unwrap()).unwrap();

        let err = store.find("openai", "fp-3", Some("s3cr3t")).unwrap_err();
        assert!(matches!(err, GatewayError::CassetteTamper { .. }));
    }

    #[test]
    fn unsigned_cassette_accepted_when_secret_is_configured() {
        let dir = tempdir().unwrap();
        let store = CassetteStore::new(dir.path());
        store.save("openai", "fp-4", sample(), None).unwrap();
        let found = store.find("openai", "fp-4", Some("s3cr3t")).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn stats_counts_cassettes_per_provider() {
        let dir = tempdir().unwrap();
        let store = CassetteStore::new(dir.path());
        store.save("openai", "a", sample(), None).unwrap();
        store.save("openai", "b", sample(), None).unwrap();
        store.save("anthropic", "c", sample(), None).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats, vec![("anthropic".to_string(), 1), ("openai".to_string(), 2)]);
    }
}
