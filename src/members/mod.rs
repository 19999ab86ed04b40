mod join;

use axum::{routing::{get, post}, Router};
use rand::{seq::IndexedRandom, Rng};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    clock::Clock,
    db::{MediaUploads, Membership},
    session::{MembershipToken, SessionContext},
    store::Store,
    validators, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{uuid}/join", post(join::join))
        .route("/{uuid}/session", get(join::restore))
}

const ADJECTIVES: &[&str] = &[
    "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
    "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
    "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
];

const NOUNS: &[&str] = &[
    "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
    "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
    "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
];

pub fn avatar_url() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Void");
    let seed = format!("{adjective}{noun}{}", rng.random_range(0..10_000));
    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={seed}")
}

/// Joins a void under `nickname` and remembers the membership in `session`.
///
/// Occupancy and nickname are checked first and then the insert is left to
/// the store, which may enforce both again atomically. Stores that cannot
/// leave a window where two concurrent joins both pass the checks.
pub async fn join(
    store: &dyn Store,
    clock: &dyn Clock,
    session: &mut SessionContext,
    void_id: Uuid,
    nickname: &str,
) -> AppResult<Membership> {
    let nickname = nickname.trim();
    validators::NICKNAME.run(nickname)?;

    let room = store.get_room(void_id).await?.ok_or(AppError::NotFound("void"))?;
    if store.count_members(void_id).await? >= room.user_cap {
        return Err(AppError::RoomFull);
    }
    if store.find_member_by_nickname(void_id, nickname).await?.is_some() {
        return Err(AppError::NicknameTaken(nickname.to_owned()));
    }

    let member = store
        .insert_member(
            &Membership {
                id: Uuid::now_v7(),
                void_id,
                nickname: nickname.to_owned(),
                avatar_url: avatar_url(),
                joined_at: clock.now(),
                media_uploads: MediaUploads::default(),
            },
            room.user_cap,
        )
        .await?;

    session.remember(void_id, MembershipToken::from(&member));
    tracing::info!("{} joined void {void_id} as {}", member.id, member.nickname);
    Ok(member)
}

/// The membership this session holds in a void, if it still exists.
/// A stale token is dropped and `None` tells the caller to rejoin.
pub async fn restore_session(
    store: &dyn Store,
    session: &mut SessionContext,
    void_id: Uuid,
) -> AppResult<Option<Membership>> {
    let Some(token) = session.membership(void_id) else {
        return Ok(None);
    };

    match store.get_member(token.member_id).await? {
        Some(member) if member.void_id == void_id => Ok(Some(member)),
        _ => {
            tracing::debug!("dropping stale membership {} for void {void_id}", token.member_id);
            session.forget(void_id);
            Ok(None)
        }
    }
}

/// The caller's membership in a void, for routes only members may use.
pub async fn require_member(store: &dyn Store, session: &Session, void_id: Uuid) -> AppResult<(SessionContext, Membership)> {
    let mut ctx = SessionContext::load(session).await?;
    match restore_session(store, &mut ctx, void_id).await? {
        Some(member) => Ok((ctx, member)),
        None => {
            ctx.save(session).await?;
            Err(AppError::NoPermission)
        }
    }
}
