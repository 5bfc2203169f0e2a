use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::Database;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub surname: String,
    /// Организация, от имени которой пользователь может ставить холды организатора.
    pub organization_id: Option<Uuid>,
    pub is_active: bool,
}

impl User {
    // Найти активного пользователя по email
    pub async fn find_by_email(email: &str, db: &Database) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, first_name, surname, organization_id, is_active
             FROM users
             WHERE email = $1 AND is_active = true"
        )
        .bind(email)
        .fetch_optional(&db.pool)
        .await
    }

    // Проверить пароль по bcrypt-хешу
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}
