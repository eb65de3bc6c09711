//! Directory authorities: the hard-coded servers from which we can
//! bootstrap a view of the network.

use garlic_crypto::pk::rsa::RsaIdentity;
use std::net::SocketAddr;

/// A directory authority whose location ships with the client, used
/// for fetching an initial network-status document when we don't know
/// anything else about the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    /// Name of the authority, for logging.
    pub name: String,
    /// Address of the authority's directory port.
    pub dir_addr: SocketAddr,
    /// The authority's v3 identity fingerprint.
    pub v3ident: RsaIdentity,
}

/// The built-in authority list, regenerated from the reference
/// implementation from time to time.
static AUTH_DIRS: &[(&str, &str, &str)] = &include!("auth_dirs.inc");

/// Return the list of default directory authorities.
pub fn default_authorities() -> Vec<Authority> {
    AUTH_DIRS
        .iter()
        .map(|(name, addr, ident)| Authority {
            name: (*name).into(),
            dir_addr: addr.parse().expect("built-in authority address"),
            v3ident: RsaIdentity::from_hex(ident).expect("built-in authority identity"),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtin_list_is_wellformed() {
        let auths = default_authorities();
        assert!(auths.len() >= 8);
        assert!(auths.iter().any(|a| a.name == "moria1"));
        for a in &auths {
            assert!(a.dir_addr.port() != 0);
        }
    }
}
