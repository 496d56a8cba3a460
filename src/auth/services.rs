use anyhow::Context;
use tracing::{info, warn};

use crate::{
    auth::{
        claims::TokenPayload,
        dto::{LoginRequest, RefreshRequest, RegisterRequest, RegisterResponse},
        extractors::AuthUser,
        jwt::{TokenError, TokenPair},
        password::{hash_password_blocking, verify_password_blocking},
        validation::{validate_login, validate_registration},
    },
    error::{AppError, AppResult},
    state::AppState,
    users::{
        repo::StoreError,
        repo_types::{NewUser, PublicUser},
    },
};

fn issue_tokens(state: &AppState, payload: &TokenPayload) -> AppResult<TokenPair> {
    state
        .keys
        .issue_pair(payload)
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("issue token pair")))
}

/// Validate, verify the address, then hash and insert.
///
/// The duplicate lookup only gives a friendly early answer; two concurrent
/// registrations can both pass it, and the unique index on `users.email`
/// decides which one wins.
pub async fn create_account(state: &AppState, req: &RegisterRequest) -> AppResult<PublicUser> {
    let reg = validate_registration(req).map_err(|fields| {
        warn!(?fields, "registration rejected");
        AppError::invalid_fields(fields)
    })?;

    if !state.email.verify(&reg.email).await {
        warn!(email = %reg.email, "email failed verification");
        return Err(AppError::invalid("email invalid or nonexistent"));
    }

    let existing = state
        .users
        .find_by_email(&reg.email, false)
        .await
        .context("check for existing email")?;
    if existing.is_some() {
        warn!(email = %reg.email, "email already registered");
        return Err(AppError::conflict("email already registered"));
    }

    let password_hash = hash_password_blocking(reg.password)
        .await
        .context("hash password")?;

    let new_user = NewUser {
        name: reg.name,
        email: reg.email,
        password_hash,
    };
    match state.users.create(&new_user).await {
        Ok(user) => Ok(user.into()),
        Err(StoreError::DuplicateEmail) => {
            warn!(email = %new_user.email, "email registered concurrently");
            Err(AppError::conflict("email already registered"))
        }
        Err(StoreError::Other(e)) => Err(AppError::Internal(e.context("register user"))),
    }
}

pub async fn register(state: &AppState, req: &RegisterRequest) -> AppResult<RegisterResponse> {
    let user = create_account(state, req).await?;
    info!(user_id = user.id, email = %user.email, "user registered");
    Ok(RegisterResponse {
        message: "user created".into(),
        user_id: user.id,
    })
}

pub async fn login(state: &AppState, req: &LoginRequest) -> AppResult<TokenPair> {
    let creds = validate_login(req).map_err(AppError::invalid_fields)?;

    let Some(user) = state
        .users
        .find_by_email(&creds.email, true)
        .await
        .context("find user for login")?
    else {
        warn!(email = %creds.email, "login unknown email");
        return Err(AppError::unauthorized("user not registered"));
    };

    let hash = user
        .password_hash
        .clone()
        .context("stored user has no password hash")?;
    let ok = verify_password_blocking(creds.password, hash)
        .await
        .context("verify password")?;
    if !ok {
        warn!(user_id = user.id, "login invalid password");
        return Err(AppError::unauthorized("password does not match"));
    }

    let pair = issue_tokens(
        state,
        &TokenPayload {
            user_id: user.id,
            email: user.email.clone(),
        },
    )?;
    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(pair)
}

/// Re-issues both tokens from the refresh token's own payload. The store is
/// not consulted and the presented token stays valid until it expires.
pub fn refresh(state: &AppState, req: &RefreshRequest) -> AppResult<TokenPair> {
    let token = req
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("refresh token missing"))?;

    let claims = state.keys.verify_refresh(token).map_err(|e| {
        match e {
            TokenError::Expired => warn!("refresh token expired"),
            other => warn!(error = %other, "refresh token rejected"),
        }
        AppError::unauthorized("refresh token invalid or expired")
    })?;

    issue_tokens(state, &claims.payload())
}

pub async fn profile(state: &AppState, auth: &AuthUser) -> AppResult<PublicUser> {
    let user = state
        .users
        .find_by_id(auth.id)
        .await
        .context("load profile")?
        .ok_or_else(|| {
            warn!(user_id = auth.id, "token subject no longer exists");
            AppError::unauthorized("user not found")
        })?;
    Ok(user.into())
}

pub async fn list_users(state: &AppState) -> AppResult<Vec<PublicUser>> {
    Ok(state.users.list().await.context("list users")?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        auth::{email::StaticVerifier, password::verify_password},
        users::memory::{FailingUserStore, InMemoryUserStore, RacingUserStore},
    };

    fn setup() -> (AppState, Arc<InMemoryUserStore>) {
        let store = Arc::new(InMemoryUserStore::new());
        let state = AppState::fake_with(store.clone(), Arc::new(StaticVerifier(true)));
        (state, store)
    }

    fn ana(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: Some("Ana".into()),
            email: Some(email.into()),
            password: Some("secret1".into()),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    #[tokio::test]
    async fn register_stores_normalized_email_and_hashed_password() {
        let (state, store) = setup();
        let res = register(&state, &ana("Ana@X.com ")).await.expect("register");
        assert_eq!(res.user_id, 1);

        let row = store.raw_by_email("ana@x.com").await.expect("stored");
        let hash = row.password_hash.expect("hash stored");
        assert_ne!(hash, "secret1");
        assert!(verify_password("secret1", &hash).unwrap());
    }

    #[tokio::test]
    async fn duplicate_normalized_email_conflicts() {
        let (state, _) = setup();
        register(&state, &ana("Ana@X.com ")).await.expect("first");
        let err = register(&state, &ana("ANA@X.COM")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn unique_violation_on_insert_conflicts() {
        let state = AppState::fake_with(Arc::new(RacingUserStore), Arc::new(StaticVerifier(true)));
        match register(&state, &ana("ana@x.com")).await.unwrap_err() {
            AppError::Conflict(msg) => assert_eq!(msg, "email already registered"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unverified_email_is_invalid_input() {
        let state = AppState::fake_with(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(StaticVerifier(false)),
        );
        let err = register(&state, &ana("ana@x.com")).await.unwrap_err();
        match err {
            AppError::InvalidInput { message, .. } => {
                assert_eq!(message, "email invalid or nonexistent")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn weak_password_is_invalid_input() {
        let (state, store) = setup();
        let mut req = ana("ana@x.com");
        req.password = Some("12345".into());
        let err = register(&state, &req).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
        assert!(store.raw_by_email("ana@x.com").await.is_none());
    }

    #[tokio::test]
    async fn store_failure_is_internal() {
        let state = AppState::fake_with(Arc::new(FailingUserStore), Arc::new(StaticVerifier(true)));
        let err = register(&state, &ana("ana@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn login_returns_tokens_for_the_same_identity() {
        let (state, _) = setup();
        let reg = register(&state, &ana("ana@x.com")).await.unwrap();
        let pair = login(&state, &login_req(" ANA@x.com", "secret1")).await.expect("login");

        let access = state.keys.verify(&pair.access_token).unwrap();
        let refresh = state.keys.verify(&pair.refresh_token).unwrap();
        assert_eq!(access.sub, reg.user_id);
        assert_eq!(access.payload(), refresh.payload());
        assert_eq!(access.email, "ana@x.com");
    }

    #[tokio::test]
    async fn login_distinguishes_unknown_user_from_wrong_password() {
        let (state, _) = setup();
        register(&state, &ana("ana@x.com")).await.unwrap();

        match login(&state, &login_req("ana@x.com", "wrong-pass")).await.unwrap_err() {
            AppError::Unauthorized(msg) => assert_eq!(msg, "password does not match"),
            other => panic!("unexpected {other:?}"),
        }
        match login(&state, &login_req("bob@x.com", "secret1")).await.unwrap_err() {
            AppError::Unauthorized(msg) => assert_eq!(msg, "user not registered"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_reissues_same_payload() {
        let (state, _) = setup();
        register(&state, &ana("ana@x.com")).await.unwrap();
        let pair = login(&state, &login_req("ana@x.com", "secret1")).await.unwrap();

        let renewed = refresh(
            &state,
            &RefreshRequest {
                refresh_token: Some(pair.refresh_token.clone()),
            },
        )
        .expect("refresh");
        let before = state.keys.verify(&pair.access_token).unwrap().payload();
        let after = state.keys.verify(&renewed.access_token).unwrap().payload();
        assert_eq!(before, after);
        assert_eq!(
            state.keys.verify_refresh(&renewed.refresh_token).unwrap().payload(),
            before
        );

        // no rotation: the old refresh token still works
        assert!(refresh(&state, &RefreshRequest { refresh_token: Some(pair.refresh_token) }).is_ok());
    }

    #[tokio::test]
    async fn refresh_rejects_missing_tampered_and_access_tokens() {
        let (state, _) = setup();
        let payload = TokenPayload {
            user_id: 3,
            email: "ana@x.com".into(),
        };
        let pair = state.keys.issue_pair(&payload).unwrap();

        for token in [None, Some("  ".to_string()), Some(format!("{}x", pair.refresh_token)), Some(pair.access_token)] {
            let err = refresh(&state, &RefreshRequest { refresh_token: token }).unwrap_err();
            assert!(matches!(err, AppError::Unauthorized(_)));
        }
    }

    #[tokio::test]
    async fn profile_and_listing_hide_password() {
        let (state, _) = setup();
        let reg = register(&state, &ana("ana@x.com")).await.unwrap();
        let me = profile(
            &state,
            &AuthUser {
                id: reg.user_id,
                email: "ana@x.com".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(me.name, "Ana");

        let all = list_users(&state).await.unwrap();
        assert_eq!(all, vec![me]);
        assert!(!serde_json::to_string(&all).unwrap().contains("password"));
    }

    #[tokio::test]
    async fn profile_of_deleted_user_is_unauthorized() {
        let (state, _) = setup();
        let err = profile(&state, &AuthUser { id: 42, email: "ghost@x.com".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
