//! System account lookup.
//!
//! The proxy drops worker privileges to `run_as_user`; the account has to
//! exist and must not be a superuser.

use std::io;

use nix::unistd::User;

/// A resolved system account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl SystemUser {
    /// Superuser accounts are never acceptable as worker users.
    pub fn is_privileged(&self) -> bool {
        self.uid == 0
    }
}

impl From<User> for SystemUser {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }
    }
}

/// Source of system accounts.
pub trait UserRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> io::Result<Option<SystemUser>>;
}

/// Resolves accounts through the C library (`getpwnam_r`), so every NSS
/// source configured in nsswitch.conf is consulted, not just `/etc/passwd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NssRegistry;

impl UserRegistry for NssRegistry {
    fn lookup(&self, name: &str) -> io::Result<Option<SystemUser>> {
        let user = User::from_name(name).map_err(io::Error::from)?;
        Ok(user.map(SystemUser::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_resolves_as_privileged() {
        let root = NssRegistry.lookup("root").unwrap().unwrap();
        assert_eq!(root.uid, 0);
        assert!(root.is_privileged());
    }

    #[test]
    fn test_unknown_account() {
        assert!(NssRegistry.lookup("no-such-account-7f3a").unwrap().is_none());
    }

    #[test]
    fn test_regular_account_not_privileged() {
        let user = SystemUser {
            name: "nginx".into(),
            uid: 998,
            gid: 996,
        };
        assert!(!user.is_privileged());
    }
}
