//! Follow graph and public profile aggregation.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    error::{bad_request, AppError},
    models::{Profile, User, Video},
};

async fn get_user(pool: &SqlitePool, user_id: i64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("user"))
}

pub async fn follow(pool: &SqlitePool, follower_id: i64, followee_id: i64) -> Result<(), AppError> {
    if follower_id == followee_id {
        return Err(bad_request("cannot follow yourself"));
    }
    get_user(pool, followee_id).await?;

    sqlx::query(
        "INSERT INTO follows (follower_id, followee_id, created_at) VALUES (?, ?, ?)
         ON CONFLICT (follower_id, followee_id) DO NOTHING",
    )
    .bind(follower_id)
    .bind(followee_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn unfollow(
    pool: &SqlitePool,
    follower_id: i64,
    followee_id: i64,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM follows WHERE follower_id = ? AND followee_id = ?")
        .bind(follower_id)
        .bind(followee_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn profile(pool: &SqlitePool, user_id: i64) -> Result<Profile, AppError> {
    let user = get_user(pool, user_id).await?;

    let follower_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE followee_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    let following_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE follower_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

    let videos = sqlx::query_as::<_, Video>(
        "SELECT * FROM videos WHERE author_id = ? AND visibility = 'PUBLIC'
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(Profile {
        user_id,
        username: user.username,
        video_count: videos.len() as i64,
        follower_count,
        following_count,
        videos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::test_pool, testutil};

    #[tokio::test]
    async fn follow_is_idempotent_and_counted() {
        let pool = test_pool().await;
        let a = testutil::user(&pool, "a").await;
        let b = testutil::user(&pool, "b").await;

        follow(&pool, a, b).await.unwrap();
        follow(&pool, a, b).await.unwrap();

        let profile = profile(&pool, b).await.unwrap();
        assert_eq!(profile.follower_count, 1);
        assert_eq!(profile.following_count, 0);
    }

    #[tokio::test]
    async fn self_follow_rejected() {
        let pool = test_pool().await;
        let a = testutil::user(&pool, "a").await;

        assert!(matches!(
            follow(&pool, a, a).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn unfollow_removes_edge() {
        let pool = test_pool().await;
        let a = testutil::user(&pool, "a").await;
        let b = testutil::user(&pool, "b").await;

        follow(&pool, a, b).await.unwrap();
        unfollow(&pool, a, b).await.unwrap();

        let profile = profile(&pool, b).await.unwrap();
        assert_eq!(profile.follower_count, 0);
    }

    #[tokio::test]
    async fn profile_hides_private_videos() {
        let pool = test_pool().await;
        let a = testutil::user(&pool, "a").await;
        testutil::video_in_category(&pool, a, 1).await;
        testutil::private_video(&pool, a, 1).await;

        let profile = profile(&pool, a).await.unwrap();
        assert_eq!(profile.video_count, 1);
    }
}
