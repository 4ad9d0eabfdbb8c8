//! User account persistence.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use umeed_core::{EmailAddress, PhoneNumber};

use super::{decode_invalid, decode_name};
use crate::auth::Role;
use crate::model::UserRecord;

/// Insert a user row, or overwrite it unless the stored row is newer.
pub async fn upsert(pool: &PgPool, user: &UserRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (id, username, email, phone_number, first_name, last_name, role,
         password_hash, otp_verified, is_active, is_staff, date_joined, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (id) DO UPDATE SET
           username = EXCLUDED.username,
           email = EXCLUDED.email,
           phone_number = EXCLUDED.phone_number,
           first_name = EXCLUDED.first_name,
           last_name = EXCLUDED.last_name,
           role = EXCLUDED.role,
           password_hash = EXCLUDED.password_hash,
           otp_verified = EXCLUDED.otp_verified,
           is_active = EXCLUDED.is_active,
           is_staff = EXCLUDED.is_staff,
           updated_at = EXCLUDED.updated_at
         WHERE users.updated_at <= EXCLUDED.updated_at",
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(user.email.as_str())
    .bind(user.phone_number.as_str())
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.role.as_str())
    .bind(&user.password_hash)
    .bind(user.otp_verified)
    .bind(user.is_active)
    .bind(user.is_staff)
    .bind(user.date_joined)
    .bind(user.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load every user for startup hydration.
pub async fn load_all(pool: &PgPool) -> Result<Vec<UserRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, email, phone_number, first_name, last_name, role,
         password_hash, otp_verified, is_active, is_staff, date_joined, updated_at
         FROM users ORDER BY date_joined",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(UserRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    phone_number: String,
    first_name: String,
    last_name: String,
    role: String,
    password_hash: String,
    otp_verified: bool,
    is_active: bool,
    is_staff: bool,
    date_joined: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_record(self) -> Result<UserRecord, sqlx::Error> {
        let id = self.id;
        Ok(UserRecord {
            id,
            username: self.username,
            email: EmailAddress::new(self.email).map_err(decode_invalid("email", id))?,
            phone_number: PhoneNumber::new(self.phone_number)
                .map_err(decode_invalid("phone_number", id))?,
            first_name: self.first_name,
            last_name: self.last_name,
            role: decode_name("role", id, &self.role, Role::from_name)?,
            password_hash: self.password_hash,
            otp_verified: self.otp_verified,
            is_active: self.is_active,
            is_staff: self.is_staff,
            date_joined: self.date_joined,
            updated_at: self.updated_at,
        })
    }
}
