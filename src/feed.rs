//! Feed "next video" selection.
//!
//! Prefers unseen PUBLIC videos via count + random offset (uniform without
//! loading the candidate set), then recycles the viewer's least-recently-seen
//! video once the unseen pool is exhausted. A category filter is strict: the
//! recency constraint loosens before the category constraint ever does.

use chrono::Utc;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::debug;

use crate::{error::AppError, models::Video};

// Shared predicate for the unseen tier. `?1` category (NULL = any),
// `?2` excluded id, `?3` viewer (NULL = anonymous, excludes nothing).
const UNSEEN_POOL: &str = "FROM videos v
     WHERE v.visibility = 'PUBLIC'
       AND (?1 IS NULL OR v.category_id = ?1)
       AND v.id <> COALESCE(?2, -1)
       AND v.id NOT IN (SELECT video_id FROM user_video_seen WHERE user_id = COALESCE(?3, -1))";

pub async fn next_video(
    pool: &SqlitePool,
    user_id: Option<i64>,
    category_id: Option<i64>,
    exclude_id: Option<i64>,
) -> Result<Video, AppError> {
    let video = select_next(pool, user_id, category_id, exclude_id).await?;

    if let Some(user_id) = user_id {
        mark_seen(pool, user_id, video.id).await?;
    }

    Ok(video)
}

async fn select_next(
    pool: &SqlitePool,
    user_id: Option<i64>,
    category_id: Option<i64>,
    exclude_id: Option<i64>,
) -> Result<Video, AppError> {
    if let Some(video) = pick_unseen(pool, user_id, category_id, exclude_id).await? {
        return Ok(video);
    }

    if let Some(user_id) = user_id {
        if let Some(video) = recycle_oldest(pool, user_id, category_id).await? {
            debug!("feed recycling for user {user_id}, video {}", video.id);
            return Ok(video);
        }
    }

    // Unconstrained feeds fall back to any PUBLIC video before giving up.
    // A category filter never does: silently switching categories would
    // violate the caller's explicit filter.
    if category_id.is_none() {
        if let Some(video) = pick_any_public(pool).await? {
            return Ok(video);
        }
    }

    Err(AppError::NotFound("video"))
}

async fn pick_unseen(
    pool: &SqlitePool,
    user_id: Option<i64>,
    category_id: Option<i64>,
    exclude_id: Option<i64>,
) -> Result<Option<Video>, AppError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {UNSEEN_POOL}"))
        .bind(category_id)
        .bind(exclude_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    if count == 0 {
        return Ok(None);
    }

    let offset = rand::thread_rng().gen_range(0..count);
    let video = sqlx::query_as::<_, Video>(&format!(
        "SELECT v.* {UNSEEN_POOL} ORDER BY v.id LIMIT 1 OFFSET ?4"
    ))
    .bind(category_id)
    .bind(exclude_id)
    .bind(user_id)
    .bind(offset)
    .fetch_optional(pool)
    .await?;

    Ok(video)
}

/// Least-recently-seen PUBLIC video for this viewer, id as tiebreak.
async fn recycle_oldest(
    pool: &SqlitePool,
    user_id: i64,
    category_id: Option<i64>,
) -> Result<Option<Video>, AppError> {
    let video = sqlx::query_as::<_, Video>(
        "SELECT v.* FROM videos v
         JOIN user_video_seen seen ON seen.video_id = v.id
         WHERE seen.user_id = ?1
           AND v.visibility = 'PUBLIC'
           AND (?2 IS NULL OR v.category_id = ?2)
         ORDER BY seen.seen_at ASC, v.id ASC
         LIMIT 1",
    )
    .bind(user_id)
    .bind(category_id)
    .fetch_optional(pool)
    .await?;

    Ok(video)
}

async fn pick_any_public(pool: &SqlitePool) -> Result<Option<Video>, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos WHERE visibility = 'PUBLIC'")
        .fetch_one(pool)
        .await?;

    if count == 0 {
        return Ok(None);
    }

    let offset = rand::thread_rng().gen_range(0..count);
    let video = sqlx::query_as::<_, Video>(
        "SELECT * FROM videos WHERE visibility = 'PUBLIC' ORDER BY id LIMIT 1 OFFSET ?",
    )
    .bind(offset)
    .fetch_optional(pool)
    .await?;

    Ok(video)
}

/// One row per (viewer, video); re-showing refreshes `seen_at` so the recycle
/// tier always reflects time since last view. Rows are never deleted.
async fn mark_seen(pool: &SqlitePool, user_id: i64, video_id: i64) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO user_video_seen (user_id, video_id, seen_at) VALUES (?, ?, ?)
         ON CONFLICT (user_id, video_id) DO UPDATE SET seen_at = excluded.seen_at",
    )
    .bind(user_id)
    .bind(video_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::test_pool, testutil};
    use chrono::{Duration, Utc};

    async fn set_seen(pool: &SqlitePool, user_id: i64, video_id: i64, minutes_ago: i64) {
        sqlx::query(
            "INSERT INTO user_video_seen (user_id, video_id, seen_at) VALUES (?, ?, ?)
             ON CONFLICT (user_id, video_id) DO UPDATE SET seen_at = excluded.seen_at",
        )
        .bind(user_id)
        .bind(video_id)
        .bind(Utc::now() - Duration::minutes(minutes_ago))
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unseen_videos_are_preferred() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        let viewer = testutil::user(&pool, "viewer").await;
        let seen = testutil::video_in_category(&pool, author, 1).await;
        let unseen = testutil::video_in_category(&pool, author, 1).await;
        set_seen(&pool, viewer, seen, 5).await;

        let video = next_video(&pool, Some(viewer), None, None).await.unwrap();

        assert_eq!(video.id, unseen);
    }

    #[tokio::test]
    async fn exhausted_pool_recycles_least_recently_seen() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        let viewer = testutil::user(&pool, "viewer").await;
        let a = testutil::video_in_category(&pool, author, 7).await;
        let b = testutil::video_in_category(&pool, author, 7).await;
        let c = testutil::video_in_category(&pool, author, 7).await;
        set_seen(&pool, viewer, a, 30).await;
        set_seen(&pool, viewer, b, 90).await;
        set_seen(&pool, viewer, c, 10).await;

        let video = next_video(&pool, Some(viewer), Some(7), None).await.unwrap();

        assert_eq!(video.id, b, "must be the oldest-seen, never a random one");
    }

    #[tokio::test]
    async fn recycling_rotates_through_seen_videos() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        let viewer = testutil::user(&pool, "viewer").await;
        let a = testutil::video_in_category(&pool, author, 7).await;
        let b = testutil::video_in_category(&pool, author, 7).await;
        set_seen(&pool, viewer, a, 60).await;
        set_seen(&pool, viewer, b, 30).await;

        let first = next_video(&pool, Some(viewer), Some(7), None).await.unwrap();
        assert_eq!(first.id, a);

        // Serving `a` refreshed its seen_at, so `b` is now the oldest.
        let second = next_video(&pool, Some(viewer), Some(7), None).await.unwrap();
        assert_eq!(second.id, b);
    }

    #[tokio::test]
    async fn empty_category_is_not_found_even_when_others_have_videos() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        let viewer = testutil::user(&pool, "viewer").await;
        testutil::video_in_category(&pool, author, 1).await;

        let result = next_video(&pool, Some(viewer), Some(2), None).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn private_videos_are_never_served() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        testutil::private_video(&pool, author, 3).await;

        let result = next_video(&pool, None, Some(3), None).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn anonymous_unconstrained_feed_ignores_exclusion_before_failing() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        let only = testutil::video_in_category(&pool, author, 1).await;

        let video = next_video(&pool, None, None, Some(only)).await.unwrap();

        assert_eq!(video.id, only);
    }

    #[tokio::test]
    async fn excluded_video_is_skipped_while_alternatives_exist() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        let excluded = testutil::video_in_category(&pool, author, 1).await;
        let other = testutil::video_in_category(&pool, author, 1).await;

        let video = next_video(&pool, None, None, Some(excluded)).await.unwrap();

        assert_eq!(video.id, other);
    }

    #[tokio::test]
    async fn serving_a_video_marks_it_seen() {
        let pool = test_pool().await;
        let author = testutil::user(&pool, "author").await;
        let viewer = testutil::user(&pool, "viewer").await;
        let video_id = testutil::video_in_category(&pool, author, 1).await;

        next_video(&pool, Some(viewer), None, None).await.unwrap();

        let seen: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_video_seen WHERE user_id = ? AND video_id = ?",
        )
        .bind(viewer)
        .bind(video_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn empty_store_is_not_found() {
        let pool = test_pool().await;

        let result = next_video(&pool, None, None, None).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
