use rand::Rng;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    clock::Clock,
    db::{Room, Visibility, MAX_USER_CAP, MIN_USER_CAP},
    store::Store,
    validators,
};

const ACCESS_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ACCESS_CODE_LEN: usize = 6;
const ACCESS_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoom {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub user_cap: i64,
    #[serde(default)]
    pub visibility: Visibility,
}

pub fn access_code() -> String {
    let mut rng = rand::rng();
    (0..ACCESS_CODE_LEN)
        .map(|_| ACCESS_CODE_ALPHABET[rng.random_range(0..ACCESS_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn normalize_access_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub async fn list_rooms(store: &dyn Store) -> AppResult<Vec<Room>> {
    store.list_rooms().await
}

pub async fn get_room(store: &dyn Store, id: Uuid) -> AppResult<Room> {
    store.get_room(id).await?.ok_or(AppError::NotFound("void"))
}

pub async fn create_room(
    store: &dyn Store,
    clock: &dyn Clock,
    NewRoom { name, description, user_cap, visibility }: NewRoom,
    creator: Option<Uuid>,
) -> AppResult<Room> {
    let name = name.trim().to_owned();
    validators::VOID_NAME.run(&name)?;
    let description = description.map(|d| d.trim().to_owned()).filter(|d| !d.is_empty());
    if let Some(description) = &description {
        validators::DESCRIPTION.run(description)?;
    }
    if !(MIN_USER_CAP..=MAX_USER_CAP).contains(&user_cap) {
        return Err(AppError::validation(format!(
            "User cap must be between {MIN_USER_CAP} and {MAX_USER_CAP}."
        )));
    }

    let mut code = access_code();
    for _ in 1..ACCESS_CODE_ATTEMPTS {
        if store.find_room_by_code(&code).await?.is_none() {
            break;
        }
        code = access_code();
    }

    let room = store
        .insert_room(&Room {
            id: Uuid::now_v7(),
            name,
            description,
            access_code: code,
            user_cap,
            created_at: clock.now(),
            created_by: creator,
            is_private: visibility.is_private(),
        })
        .await?;
    tracing::info!("created void {} ({}) with code {}", room.name, room.id, room.access_code);
    Ok(room)
}

pub async fn resolve_access_code(store: &dyn Store, code: &str) -> AppResult<Uuid> {
    let code = normalize_access_code(code);
    if code.is_empty() {
        return Err(AppError::validation("Access code cannot be empty."));
    }
    store
        .find_room_by_code(&code)
        .await?
        .map(|room| room.id)
        .ok_or(AppError::NotFound("void"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, store::SqliteStore};

    fn new_room(name: &str, user_cap: i64) -> NewRoom {
        NewRoom { name: name.to_owned(), description: None, user_cap, visibility: Visibility::Public }
    }

    #[test]
    fn access_codes_use_alphabet() {
        let code = access_code();
        assert_eq!(code.len(), ACCESS_CODE_LEN);
        assert!(code.bytes().all(|b| ACCESS_CODE_ALPHABET.contains(&b)));
        assert_eq!(normalize_access_code(" ab12cd "), "AB12CD");
    }

    #[tokio::test]
    async fn create_validates_input() -> AppResult<()> {
        let store = SqliteStore::memory().await?;
        for (name, cap) in [("Test", 1), ("Test", 51), ("   ", 2)] {
            let result = create_room(&store, &SystemClock, new_room(name, cap), None).await;
            assert!(matches!(result, Err(AppError::Validation(_))), "{name:?} {cap}");
        }
        assert!(list_rooms(&store).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn create_list_resolve() -> AppResult<()> {
        let store = SqliteStore::memory().await?;
        let creator = Uuid::new_v4();
        let first = create_room(&store, &SystemClock, new_room(" First ", 2), Some(creator)).await?;
        let second = create_room(&store, &SystemClock, new_room("Second", 50), None).await?;
        assert_eq!(first.name, "First");
        assert_eq!(first.created_by, Some(creator));

        let names: Vec<_> = list_rooms(&store).await?.into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["Second", "First"]);

        let lower = first.access_code.to_ascii_lowercase();
        assert_eq!(resolve_access_code(&store, &lower).await?, first.id);
        assert_eq!(get_room(&store, second.id).await?.user_cap, 50);
        assert!(matches!(resolve_access_code(&store, "NOPE00").await, Err(AppError::NotFound(_))));
        Ok(())
    }
}
