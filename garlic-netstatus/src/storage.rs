//! Persist the network-status snapshot between runs.
//!
//! We keep exactly one file: the serialized [`NetworkStatus`],
//! overwritten after each successful download.  A snapshot made with
//! a custom authority list gets its own file, keyed by a hash of that
//! list, so that test networks don't poison the real cache.

use crate::{Authority, NetworkStatus};
use garlic_crypto::d::Sha3_256;
use digest::Digest;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Return the snapshot path under `dir` for the given authority set.
pub(crate) fn snapshot_path(dir: &Path, custom_authorities: Option<&[Authority]>) -> PathBuf {
    match custom_authorities {
        None => dir.join("network_status"),
        Some(auths) => {
            let mut d = Sha3_256::new();
            for a in auths {
                d.update(a.name.as_bytes());
                d.update(a.dir_addr.to_string().as_bytes());
                d.update(a.v3ident.as_bytes());
            }
            let digest = d.finalize();
            dir.join(format!("network_status_{}", hex::encode(&digest[..8])))
        }
    }
}

/// Try to load a snapshot from `path`.  Any failure (missing file,
/// stale format) just means we re-download.
pub(crate) fn load_snapshot(path: &Path) -> Option<NetworkStatus> {
    let raw = fs::read(path).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("discarding unreadable snapshot {:?}: {}", path, e);
            None
        }
    }
}

/// Write `status` to `path`, creating the parent directory if needed.
pub(crate) fn save_snapshot(path: &Path, status: &NetworkStatus) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_vec(status).map_err(std::io::Error::other)?;
    fs::write(path, raw)?;
    debug!("wrote network status snapshot to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authority::default_authorities;

    #[test]
    fn paths_differ_for_custom_authorities() {
        let dir = Path::new("/tmp/garlic");
        let default = snapshot_path(dir, None);
        let auths = default_authorities();
        let custom = snapshot_path(dir, Some(&auths[..1]));
        assert_eq!(default, dir.join("network_status"));
        assert_ne!(default, custom);
        assert!(custom
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("network_status_"));
    }

    #[test]
    fn roundtrip() {
        let dir = std::env::temp_dir().join("garlic-test-snapshots");
        let path = dir.join("network_status");
        let status = NetworkStatus {
            valid_after: 100,
            fresh_until: 200,
            valid_until: 300,
            ..NetworkStatus::default()
        };
        save_snapshot(&path, &status).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded.fresh_until, 200);
        fs::remove_file(&path).unwrap();
        assert!(load_snapshot(&path).is_none());
    }
}
