use chrono::Utc;
use rusqlite::params;

use parley_shared::{UserId, UserProfile};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::parse_user_id;

impl Database {
    /// Insert or refresh a profile synced from the identity service.
    pub fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 avatar       = excluded.avatar,
                 updated_at   = excluded.updated_at",
            params![
                profile.id.as_str(),
                profile.display_name,
                profile.avatar,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<UserProfile> {
        self.conn()
            .query_row(
                "SELECT id, display_name, avatar FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let id_str: String = row.get(0)?;
                    Ok(UserProfile {
                        id: parse_user_id(0, &id_str)?,
                        display_name: row.get(1)?,
                        avatar: row.get(2)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}
