//! Immutable runtime context shared by the relayer and its handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::user::{EagleUser, UserSpeed};

/// Configuration plus the user table, built once at startup.
#[derive(Debug)]
pub struct RelayContext {
    config: Config,
    local_user: Arc<EagleUser>,
    users: HashMap<String, Arc<EagleUser>>,
}

impl RelayContext {
    /// Validate a configuration and build the context from it.
    pub fn new(config: Config) -> Result<Self> {
        if config.server.port == 0 {
            return Err(Error::Config("server.port must not be 0".into()));
        }
        if config.local_user.id.is_empty() {
            return Err(Error::Config("local_user.id must not be empty".into()));
        }

        let mut users = HashMap::with_capacity(config.users.len());
        for user in &config.users {
            if user.id.is_empty() {
                return Err(Error::Config("user id must not be empty".into()));
            }
            if users
                .insert(user.id.clone(), Arc::new(EagleUser::from_config(user)))
                .is_some()
            {
                return Err(Error::Config(format!("duplicate user id: {}", user.id)));
            }
        }

        let local_user = Arc::new(EagleUser::from_config(&config.local_user));

        Ok(Self {
            config,
            local_user,
            users,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// This node's own identity.
    pub fn local_user(&self) -> &Arc<EagleUser> {
        &self.local_user
    }

    pub fn user(&self, id: &str) -> Option<&Arc<EagleUser>> {
        self.users.get(id)
    }

    /// Whether inbound EagleTunnel clients must present credentials.
    pub fn requires_auth(&self) -> bool {
        !self.users.is_empty()
    }

    /// Every user plus the local user, the set the speed-check loop walks.
    pub fn all_users(&self) -> impl Iterator<Item = &Arc<EagleUser>> {
        self.users.values().chain(std::iter::once(&self.local_user))
    }

    /// Accounting snapshot of every user, local user first.
    pub fn user_speeds(&self) -> Vec<UserSpeed> {
        let mut speeds = vec![self.local_user.snapshot()];
        let mut others: Vec<_> = self.users.values().map(|u| u.snapshot()).collect();
        others.sort_by(|a, b| a.id.cmp(&b.id));
        speeds.extend(others);
        speeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    fn user(id: &str) -> UserConfig {
        UserConfig {
            id: id.to_string(),
            password: "pw".to_string(),
            speed_limit: None,
        }
    }

    #[test]
    fn builds_user_table() {
        let mut config = Config::default();
        config.users = vec![user("alice"), user("bob")];

        let ctx = RelayContext::new(config).unwrap();
        assert!(ctx.requires_auth());
        assert!(ctx.user("alice").is_some());
        assert!(ctx.user("mallory").is_none());
        assert_eq!(ctx.all_users().count(), 3);
        assert!(ctx.local_user().is_anonymous());

        let ids: Vec<_> = ctx.user_speeds().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["root", "alice", "bob"]);
    }

    #[test]
    fn rejects_duplicate_users() {
        let mut config = Config::default();
        config.users = vec![user("alice"), user("alice")];

        let err = RelayContext::new(config).unwrap_err();
        assert!(err.to_string().contains("duplicate user id"));
    }

    #[test]
    fn no_users_means_open_relay() {
        let ctx = RelayContext::new(Config::default()).unwrap();
        assert!(!ctx.requires_auth());
        assert_eq!(ctx.all_users().count(), 1);
    }
}
