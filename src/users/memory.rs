use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::users::{
    repo::{StoreError, UserStore},
    repo_types::{NewUser, PublicUser, User},
};

/// `UserStore` kept in a vector, with the same unique-email rule as the table.
#[derive(Default)]
pub struct InMemoryUserStore {
    rows: RwLock<Vec<User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw row including the stored hash, for assertions.
    pub async fn raw_by_email(&self, email: &str) -> Option<User> {
        self.rows.read().await.iter().find(|u| u.email == email).cloned()
    }
}

fn strip_hash(mut user: User, with_password: bool) -> User {
    if !with_password {
        user.password_hash = None;
    }
    user
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(
        &self,
        email: &str,
        with_password: bool,
    ) -> anyhow::Result<Option<User>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .map(|u| strip_hash(u, with_password)))
    }

    async fn find_by_id(&self, id: i32) -> anyhow::Result<Option<User>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .map(|u| strip_hash(u, false)))
    }

    async fn list(&self) -> anyhow::Result<Vec<PublicUser>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().cloned().map(PublicUser::from).collect())
    }

    async fn create(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let row = User {
            id: rows.len() as i32 + 1,
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: Some(user.password_hash.clone()),
            created_at: OffsetDateTime::now_utc(),
        };
        rows.push(row.clone());
        Ok(strip_hash(row, false))
    }
}

/// Store whose every call fails, for exercising the internal-error path.
pub struct FailingUserStore;

#[async_trait]
impl UserStore for FailingUserStore {
    async fn find_by_email(&self, _email: &str, _with_password: bool) -> anyhow::Result<Option<User>> {
        anyhow::bail!("connection refused")
    }

    async fn find_by_id(&self, _id: i32) -> anyhow::Result<Option<User>> {
        anyhow::bail!("connection refused")
    }

    async fn list(&self) -> anyhow::Result<Vec<PublicUser>> {
        anyhow::bail!("connection refused")
    }

    async fn create(&self, _user: &NewUser) -> Result<User, StoreError> {
        Err(StoreError::Other(anyhow::anyhow!("connection refused")))
    }
}

/// Lookup always misses but the insert hits the unique index, as when a
/// concurrent registration commits between the two calls.
pub struct RacingUserStore;

#[async_trait]
impl UserStore for RacingUserStore {
    async fn find_by_email(&self, _email: &str, _with_password: bool) -> anyhow::Result<Option<User>> {
        Ok(None)
    }

    async fn find_by_id(&self, _id: i32) -> anyhow::Result<Option<User>> {
        Ok(None)
    }

    async fn list(&self) -> anyhow::Result<Vec<PublicUser>> {
        Ok(Vec::new())
    }

    async fn create(&self, _user: &NewUser) -> Result<User, StoreError> {
        Err(StoreError::DuplicateEmail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Ana".into(),
            email: email.into(),
            password_hash: "$argon2id$fake".into(),
        }
    }

    #[tokio::test]
    async fn hash_is_only_returned_when_requested() {
        let store = InMemoryUserStore::new();
        let created = store.create(&new_user("ana@x.com")).await.unwrap();
        assert!(created.password_hash.is_none());

        let plain = store.find_by_email("ana@x.com", false).await.unwrap().unwrap();
        assert!(plain.password_hash.is_none());
        let full = store.find_by_email("ana@x.com", true).await.unwrap().unwrap();
        assert_eq!(full.password_hash.as_deref(), Some("$argon2id$fake"));
    }

    #[tokio::test]
    async fn rejects_duplicate_email() {
        let store = InMemoryUserStore::new();
        store.create(&new_user("ana@x.com")).await.unwrap();
        let err = store.create(&new_user("ana@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }
}
