//! What a client remembers between visits: a client id (used as the creator
//! reference of voids it makes), one membership token per joined void and
//! the admin flag. Nothing here is cryptographically backed.

use std::{collections::HashMap, io::ErrorKind, path::Path};

use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{appresult::AppResult, db::Membership};

/// Key of the [`SessionContext`] inside a cookie session.
pub const VOID_SESSION: &str = "void_session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipToken {
    pub member_id: Uuid,
    pub nickname: String,
    pub avatar_url: String,
}

impl From<&Membership> for MembershipToken {
    fn from(member: &Membership) -> Self {
        Self {
            member_id: member.id,
            nickname: member.nickname.clone(),
            avatar_url: member.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub client_id: Uuid,
    #[serde(default)]
    memberships: HashMap<Uuid, MembershipToken>,
    #[serde(default)]
    admin: bool,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            client_id: Uuid::new_v4(),
            memberships: HashMap::new(),
            admin: false,
        }
    }
}

impl SessionContext {
    pub fn membership(&self, void_id: Uuid) -> Option<&MembershipToken> {
        self.memberships.get(&void_id)
    }

    pub fn remember(&mut self, void_id: Uuid, token: MembershipToken) {
        self.memberships.insert(void_id, token);
    }

    pub fn forget(&mut self, void_id: Uuid) -> Option<MembershipToken> {
        self.memberships.remove(&void_id)
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn set_admin(&mut self, admin: bool) {
        self.admin = admin;
    }

    /// Drops every membership and the admin flag but keeps the client id.
    pub fn clear(&mut self) {
        self.memberships.clear();
        self.admin = false;
    }

    pub async fn load(session: &Session) -> AppResult<Self> {
        Ok(session.get::<SessionContext>(VOID_SESSION).await?.unwrap_or_default())
    }

    pub async fn save(&self, session: &Session) -> AppResult<()> {
        session.insert(VOID_SESSION, self).await?;
        Ok(())
    }

    /// Reads a context persisted by a native client; a missing file is a
    /// fresh context.
    pub async fn load_file(path: impl AsRef<Path>) -> AppResult<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save_file(&self, path: impl AsRef<Path>) -> AppResult<()> {
        tokio::fs::write(path, serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(nickname: &str) -> MembershipToken {
        MembershipToken {
            member_id: Uuid::now_v7(),
            nickname: nickname.to_owned(),
            avatar_url: String::new(),
        }
    }

    #[test]
    fn remember_forget_clear() {
        let mut ctx = SessionContext::default();
        let client_id = ctx.client_id;
        let void_id = Uuid::now_v7();

        ctx.remember(void_id, token("alice"));
        ctx.set_admin(true);
        assert_eq!(ctx.membership(void_id).map(|t| t.nickname.as_str()), Some("alice"));

        ctx.clear();
        assert!(ctx.membership(void_id).is_none());
        assert!(!ctx.is_admin());
        assert_eq!(ctx.client_id, client_id);

        ctx.remember(void_id, token("bob"));
        assert_eq!(ctx.forget(void_id).map(|t| t.nickname), Some("bob".to_owned()));
    }

    #[tokio::test]
    async fn persists_to_file() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        assert_eq!(SessionContext::load_file(&path).await?.membership(Uuid::nil()), None);

        let mut ctx = SessionContext::default();
        ctx.remember(Uuid::now_v7(), token("alice"));
        ctx.save_file(&path).await?;
        assert_eq!(SessionContext::load_file(&path).await?, ctx);
        Ok(())
    }
}
