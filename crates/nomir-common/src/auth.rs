//! Peer admission and operation permission.
//!
//! Authentication is a single seam rather than checks scattered through the
//! dispatcher: one object answers "may this endpoint talk to us at all" and
//! "may this admitted peer perform this operation".

use std::net::SocketAddr;

use crate::opcode::Opcode;

/// What an operation is aimed at, as seen by the permission hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// The service itself (HELLO, LIST).
    Service,
    /// A public name (RESOLVE).
    Name(&'a str),
    /// An exported object id (everything else).
    Id(u64),
}

/// Pluggable admission/permission policy.
///
/// Hooks run on worker stacks with no runtime lock held. They are infallible
/// by signature; a hook that panics is treated as a denial.
pub trait Authenticator: Send + Sync {
    /// Invoked on first contact with an endpoint, before any state is kept
    /// for it. Denied endpoints are dropped silently.
    fn admit_peer(&self, peer: SocketAddr) -> bool {
        let _ = peer;
        true
    }

    /// Invoked before every dispatch. `key` carries the textual attribute
    /// name or item key when the operation has one.
    fn permit(&self, op: Opcode, peer: SocketAddr, target: Target<'_>, key: Option<&str>) -> bool;
}

/// The default policy: admit every peer, allow every operation except
/// attribute or item access whose textual key starts with an underscore.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAuthenticator;

impl Authenticator for DefaultAuthenticator {
    fn permit(
        &self,
        _op: Opcode,
        _peer: SocketAddr,
        _target: Target<'_>,
        key: Option<&str>,
    ) -> bool {
        match key {
            Some(k) => !k.starts_with('_'),
            None => true,
        }
    }
}

/// Refuses everything; occasionally useful for quarantined services and for
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Authenticator for DenyAll {
    fn admit_peer(&self, _peer: SocketAddr) -> bool {
        false
    }

    fn permit(
        &self,
        _op: Opcode,
        _peer: SocketAddr,
        _target: Target<'_>,
        _key: Option<&str>,
    ) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:12074".parse().unwrap()
    }

    #[test]
    fn default_admits_everyone() {
        assert!(DefaultAuthenticator.admit_peer(peer()));
    }

    #[test]
    fn default_guards_underscore_keys() {
        let auth = DefaultAuthenticator;
        assert!(!auth.permit(Opcode::GetAttr, peer(), Target::Id(1), Some("_secret")));
        assert!(!auth.permit(Opcode::SetItem, peer(), Target::Id(1), Some("_k")));
        assert!(auth.permit(Opcode::GetAttr, peer(), Target::Id(1), Some("greet")));
        assert!(auth.permit(Opcode::Call, peer(), Target::Id(1), None));
        assert!(auth.permit(Opcode::List, peer(), Target::Service, None));
    }

    #[test]
    fn deny_all_refuses() {
        assert!(!DenyAll.admit_peer(peer()));
        assert!(!DenyAll.permit(Opcode::Hello, peer(), Target::Service, None));
    }
}
