//! User and group name lookup with a per-run cache.

use std::collections::HashMap;

use log::debug;
use nix::unistd::{Gid, Group, Uid, User};

/// Resolves numeric owners through the system databases, falling back to the number.
#[derive(Debug, Default)]
pub struct OwnerNames {
    users: HashMap<u16, String>,
    groups: HashMap<u16, String>,
}

impl OwnerNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&mut self, uid: u16) -> &str {
        self.users.entry(uid).or_insert_with(|| {
            debug!("user cache miss for {uid}");
            match User::from_uid(Uid::from_raw(u32::from(uid))) {
                Ok(Some(user)) => user.name,
                _ => uid.to_string(),
            }
        })
    }

    pub fn group(&mut self, gid: u16) -> &str {
        self.groups.entry(gid).or_insert_with(|| {
            debug!("group cache miss for {gid}");
            match Group::from_gid(Gid::from_raw(u32::from(gid))) {
                Ok(Some(group)) => group.name,
                _ => gid.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_resolves_by_name() {
        let mut names = OwnerNames::new();
        assert_eq!(names.user(0), "root");
    }

    #[test]
    fn unknown_ids_fall_back_to_numbers() {
        let mut names = OwnerNames::new();
        assert_eq!(names.user(64_999), "64999");
        assert_eq!(names.group(64_999), "64999");
    }

    #[test]
    fn lookups_are_cached() {
        let mut names = OwnerNames::new();
        let first = names.user(64_998).to_string();
        assert_eq!(names.users.len(), 1);
        assert_eq!(names.user(64_998), first);
        assert_eq!(names.users.len(), 1);
    }
}
