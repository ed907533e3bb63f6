use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::dto::{ChannelProfile, ValidatedRegister, VideoOwner, WatchHistoryVideo};

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 hash, never exposed in JSON
    pub avatar: String,
    pub cover_image: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>, // at most one live token
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, avatar, \
                            cover_image, refresh_token, created_at, updated_at";

impl User {
    /// Find a user by username or email; whichever identifiers are given
    /// are matched with OR semantics. Username match is case-insensitive.
    pub async fn find_by_identity(
        db: &PgPool,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NOT NULL AND username = lower($1))
               OR ($2::text IS NOT NULL AND email = $2)
            LIMIT 1
            "#,
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user. The password arrives pre-hashed; the avatar URL is
    /// mandatory at this layer because registration requires a successful upload.
    pub async fn create(
        db: &PgPool,
        input: &ValidatedRegister,
        password_hash: &str,
        avatar: &str,
        cover_image: Option<&str>,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, full_name, password_hash, avatar, cover_image)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&input.username)
        .bind(&input.email)
        .bind(&input.full_name)
        .bind(password_hash)
        .bind(avatar)
        .bind(cover_image)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("insert returned no row"))?;
        Ok(user)
    }

    /// Persist a freshly issued refresh token. Only that column is touched,
    /// so nothing else gets revalidated on session churn.
    pub async fn set_refresh_token(db: &PgPool, id: Uuid, token: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn clear_refresh_token(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET refresh_token = NULL, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Partial account update; absent fields keep their current value.
    pub async fn update_account(
        db: &PgPool,
        id: Uuid,
        full_name: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(full_name)
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn update_avatar(db: &PgPool, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET avatar = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn update_cover_image(
        db: &PgPool,
        id: Uuid,
        url: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET cover_image = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Channel page for `username` as seen by `viewer`: profile fields plus
    /// subscriber counts and whether the viewer already follows the channel.
    pub async fn channel_profile(
        db: &PgPool,
        username: &str,
        viewer: Uuid,
    ) -> anyhow::Result<Option<ChannelProfile>> {
        let profile = sqlx::query_as::<_, ChannelProfile>(
            r#"
            SELECT u.id, u.username, u.full_name, u.email, u.avatar, u.cover_image,
                   (SELECT count(*) FROM subscriptions s
                     WHERE s.channel_id = u.id) AS subscribers_count,
                   (SELECT count(*) FROM subscriptions s
                     WHERE s.subscriber_id = u.id) AS channels_subscribed_to_count,
                   EXISTS (SELECT 1 FROM subscriptions s
                            WHERE s.channel_id = u.id
                              AND s.subscriber_id = $2) AS is_subscribed
            FROM users u
            WHERE lower(u.username) = lower($1)
            "#,
        )
        .bind(username)
        .bind(viewer)
        .fetch_optional(db)
        .await?;
        Ok(profile)
    }

    /// Watch history, most recent first. Two-level join: history entry to
    /// video, video to its owner's minimal projection.
    pub async fn watch_history(db: &PgPool, id: Uuid) -> anyhow::Result<Vec<WatchHistoryVideo>> {
        let rows = sqlx::query_as::<_, WatchHistoryRow>(
            r#"
            SELECT v.id, v.title, v.description, v.video_file, v.thumbnail,
                   v.duration, v.views, v.created_at,
                   o.full_name AS owner_full_name,
                   o.username AS owner_username,
                   o.avatar AS owner_avatar
            FROM watch_history h
            JOIN videos v ON v.id = h.video_id
            JOIN users o ON o.id = v.owner_id
            WHERE h.user_id = $1
            ORDER BY h.watched_at DESC
            "#,
        )
        .bind(id)
        .fetch_all(db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| WatchHistoryVideo {
                id: r.id,
                title: r.title,
                description: r.description,
                video_file: r.video_file,
                thumbnail: r.thumbnail,
                duration: r.duration,
                views: r.views,
                created_at: r.created_at,
                owner: VideoOwner {
                    full_name: r.owner_full_name,
                    username: r.owner_username,
                    avatar: r.owner_avatar,
                },
            })
            .collect())
    }
}

#[derive(Debug, FromRow)]
struct WatchHistoryRow {
    id: Uuid,
    title: String,
    description: String,
    video_file: String,
    thumbnail: String,
    duration: f64,
    views: i64,
    created_at: OffsetDateTime,
    owner_full_name: String,
    owner_username: String,
    owner_avatar: String,
}


#[cfg(test)]
mod pg_tests {
    use super::*;

    async fn seed_user(db: &PgPool, username: &str, email: &str) -> User {
        let input = ValidatedRegister {
            username: username.into(),
            email: email.into(),
            full_name: format!("{} Fullname", username),
            password: "1234".into(),
        };
        User::create(
            db,
            &input,
            "$argon2id$stub-hash",
            "https://media.local/a.png",
            None,
        )
        .await
        .expect("seed user")
    }

    async fn subscribe(db: &PgPool, subscriber: Uuid, channel: Uuid) {
        sqlx::query("INSERT INTO subscriptions (subscriber_id, channel_id) VALUES ($1, $2)")
            .bind(subscriber)
            .bind(channel)
            .execute(db)
            .await
            .expect("insert edge");
    }

    async fn seed_video(db: &PgPool, owner: Uuid, title: &str) -> Uuid {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO videos (owner_id, title, video_file, thumbnail)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(title)
        .bind("https://media.local/v.mp4")
        .bind("https://media.local/t.png")
        .fetch_one(db)
        .await
        .expect("insert video")
    }

    #[sqlx::test]
    async fn channel_profile_derives_counts_and_subscription_state(db: PgPool) {
        let alice = seed_user(&db, "alice", "a@x.com").await;
        let bob = seed_user(&db, "bob", "b@x.com").await;
        let chan = seed_user(&db, "chan", "c@x.com").await;

        subscribe(&db, alice.id, chan.id).await;
        subscribe(&db, bob.id, chan.id).await;
        subscribe(&db, chan.id, alice.id).await; // chan follows alice back

        // username match is case-insensitive
        let profile = User::channel_profile(&db, "CHAN", alice.id)
            .await
            .expect("query")
            .expect("channel exists");
        assert_eq!(profile.subscribers_count, 2);
        assert_eq!(profile.channels_subscribed_to_count, 1);
        assert!(profile.is_subscribed);
        assert_eq!(profile.username, "chan");

        let outsider = seed_user(&db, "dave", "d@x.com").await;
        let profile = User::channel_profile(&db, "chan", outsider.id)
            .await
            .expect("query")
            .expect("channel exists");
        assert_eq!(profile.subscribers_count, 2);
        assert!(!profile.is_subscribed);

        let missing = User::channel_profile(&db, "nobody", alice.id)
            .await
            .expect("query");
        assert!(missing.is_none());
    }

    #[sqlx::test]
    async fn watch_history_resolves_videos_with_owner_projection(db: PgPool) {
        let owner = seed_user(&db, "creator", "o@x.com").await;
        let viewer = seed_user(&db, "viewer", "v@x.com").await;

        let v1 = seed_video(&db, owner.id, "first").await;
        let v2 = seed_video(&db, owner.id, "second").await;

        sqlx::query(
            "INSERT INTO watch_history (user_id, video_id, watched_at) \
             VALUES ($1, $2, now() - interval '1 minute')",
        )
        .bind(viewer.id)
        .bind(v1)
        .execute(&db)
        .await
        .expect("history v1");
        sqlx::query("INSERT INTO watch_history (user_id, video_id) VALUES ($1, $2)")
            .bind(viewer.id)
            .bind(v2)
            .execute(&db)
            .await
            .expect("history v2");

        let history = User::watch_history(&db, viewer.id).await.expect("query");
        assert_eq!(history.len(), 2);

        // most recent first
        assert_eq!(history[0].id, v2);
        assert_eq!(history[1].id, v1);

        let entry = &history[1];
        assert_eq!(entry.title, "first");
        assert_eq!(entry.owner.username, "creator");
        assert_eq!(entry.owner.full_name, owner.full_name);
        assert_eq!(entry.owner.avatar, owner.avatar);

        // the embedded owner is the minimal projection, not the full record
        let json = serde_json::to_value(&entry.owner).unwrap();
        assert!(json.get("email").is_none());
        assert!(json.get("id").is_none());

        let empty = User::watch_history(&db, owner.id).await.expect("query");
        assert!(empty.is_empty());
    }
}
