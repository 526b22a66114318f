//! Video & quiz service.
//!
//! Videos own at most one quiz, authored together with the video in a single
//! transaction. The standalone attempt path is guarded: once any course
//! section wraps a video, its quiz can only be graded through the section
//! submit path, so course completion signals cannot be bypassed.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::{
    error::{bad_request, AppError},
    models::{
        AttemptResult, Comment, NewComment, NewQuiz, NewVideo, Question, QuestionOption,
        QuestionView, QuizView, Video, Visibility,
    },
    quiz,
};

pub const MAX_DURATION_SEC: i64 = 90;

pub async fn create_video(
    pool: &SqlitePool,
    author_id: i64,
    req: NewVideo,
) -> Result<Video, AppError> {
    if req.duration_sec <= 0 || req.duration_sec > MAX_DURATION_SEC {
        return Err(bad_request(format!(
            "duration must be between 1 and {MAX_DURATION_SEC} seconds"
        )));
    }
    if let Some(quiz) = &req.quiz {
        quiz::validate_questions(&quiz.questions)?;
    }

    let mut tx = pool.begin().await?;

    let video = sqlx::query_as::<_, Video>(
        "INSERT INTO videos
             (author_id, category_id, title, description, duration_sec, visibility,
              storage_key, created_at)
         VALUES (?, ?, ?, ?, ?, ?, '', ?)
         RETURNING *",
    )
    .bind(author_id)
    .bind(req.category_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.duration_sec)
    .bind(req.visibility.unwrap_or(Visibility::Public))
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    let storage_key = format!("videos/{}.mp4", video.id);
    sqlx::query("UPDATE videos SET storage_key = ? WHERE id = ?")
        .bind(&storage_key)
        .bind(video.id)
        .execute(&mut *tx)
        .await?;

    if let Some(new_quiz) = req.quiz {
        insert_video_quiz(&mut tx, video.id, new_quiz).await?;
    }

    tx.commit().await?;

    debug!("created video {} by user {author_id}", video.id);

    Ok(Video {
        storage_key,
        ..video
    })
}

async fn insert_video_quiz(
    conn: &mut SqliteConnection,
    video_id: i64,
    new_quiz: NewQuiz,
) -> Result<(), AppError> {
    let quiz_id: i64 =
        sqlx::query_scalar("INSERT INTO quizzes (video_id, title) VALUES (?, ?) RETURNING id")
            .bind(video_id)
            .bind(&new_quiz.title)
            .fetch_one(&mut *conn)
            .await?;

    for (position, question) in new_quiz.questions.iter().enumerate() {
        let question_id: i64 = sqlx::query_scalar(
            "INSERT INTO questions (quiz_id, position, text) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(quiz_id)
        .bind(position as i64)
        .bind(&question.text)
        .fetch_one(&mut *conn)
        .await?;

        for (position, option) in question.options.iter().enumerate() {
            sqlx::query(
                "INSERT INTO options (question_id, position, text, is_correct)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(question_id)
            .bind(position as i64)
            .bind(&option.text)
            .bind(option.is_correct)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

pub async fn get_video(pool: &SqlitePool, video_id: i64) -> Result<Video, AppError> {
    sqlx::query_as::<_, Video>("SELECT * FROM videos WHERE id = ?")
        .bind(video_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("video"))
}

/// Quiz content as a learner sees it: questions and options, no correct flags.
pub async fn get_video_quiz(pool: &SqlitePool, video_id: i64) -> Result<QuizView, AppError> {
    get_video(pool, video_id).await?;

    let (quiz_id, title): (i64, String) =
        sqlx::query_as("SELECT id, title FROM quizzes WHERE video_id = ?")
            .bind(video_id)
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::NotFound("quiz"))?;

    let questions = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE quiz_id = ? ORDER BY position",
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;

    let options = sqlx::query_as::<_, QuestionOption>(
        "SELECT o.* FROM options o JOIN questions q ON o.question_id = q.id
         WHERE q.quiz_id = ? ORDER BY o.question_id, o.position",
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;

    let mut views = Vec::with_capacity(questions.len());
    for question in questions {
        let own = options
            .iter()
            .filter(|o| o.question_id == question.id)
            .cloned()
            .collect();
        views.push(QuestionView {
            question,
            options: own,
        });
    }

    Ok(QuizView {
        id: quiz_id,
        title,
        questions: views,
    })
}

pub async fn delete_video(
    pool: &SqlitePool,
    author_id: i64,
    video_id: i64,
) -> Result<(), AppError> {
    let video = get_video(pool, video_id).await?;
    if video.author_id != author_id {
        return Err(AppError::Forbidden("video"));
    }

    let section_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sections WHERE video_id = ?")
        .bind(video_id)
        .fetch_one(pool)
        .await?;
    if section_count > 0 {
        return Err(bad_request(
            "video is used by a course section and cannot be deleted",
        ));
    }

    sqlx::query("DELETE FROM videos WHERE id = ?")
        .bind(video_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn like(pool: &SqlitePool, user_id: i64, video_id: i64) -> Result<(), AppError> {
    get_video(pool, video_id).await?;

    sqlx::query(
        "INSERT INTO video_likes (user_id, video_id, created_at) VALUES (?, ?, ?)
         ON CONFLICT (user_id, video_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(video_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn unlike(pool: &SqlitePool, user_id: i64, video_id: i64) -> Result<(), AppError> {
    sqlx::query("DELETE FROM video_likes WHERE user_id = ? AND video_id = ?")
        .bind(user_id)
        .bind(video_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn comment(
    pool: &SqlitePool,
    user_id: i64,
    video_id: i64,
    req: NewComment,
) -> Result<Comment, AppError> {
    get_video(pool, video_id).await?;
    if req.body.trim().is_empty() {
        return Err(bad_request("comment body is empty"));
    }

    let comment = sqlx::query_as::<_, Comment>(
        "INSERT INTO video_comments (video_id, user_id, body, created_at)
         VALUES (?, ?, ?, ?)
         RETURNING *",
    )
    .bind(video_id)
    .bind(user_id)
    .bind(&req.body)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(comment)
}

pub async fn list_comments(pool: &SqlitePool, video_id: i64) -> Result<Vec<Comment>, AppError> {
    get_video(pool, video_id).await?;

    let comments = sqlx::query_as::<_, Comment>(
        "SELECT * FROM video_comments WHERE video_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(video_id)
    .fetch_all(pool)
    .await?;

    Ok(comments)
}

/// Standalone practice attempt on a video's quiz.
///
/// Refused outright when the video is wrapped by any course section: a single
/// video can be reused by sections of different courses, so a standalone
/// attempt has no unambiguous enrollment to credit. Section progress and
/// enrollments are never touched here.
pub async fn submit_video_quiz_attempt(
    pool: &SqlitePool,
    user_id: i64,
    video_id: i64,
    answers: &[crate::models::AnswerInput],
) -> Result<AttemptResult, AppError> {
    get_video(pool, video_id).await?;

    let section_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sections WHERE video_id = ?")
        .bind(video_id)
        .fetch_one(pool)
        .await?;
    if section_count > 0 {
        return Err(bad_request(
            "video belongs to a course section; use the section-submit path",
        ));
    }

    let quiz_id: i64 = sqlx::query_scalar("SELECT id FROM quizzes WHERE video_id = ?")
        .bind(video_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| bad_request("video has no quiz"))?;

    let key = {
        let mut conn = pool.acquire().await?;
        quiz::answer_key(&mut conn, quiz_id).await?
    };
    let outcome = quiz::grade(&key, answers);

    let mut tx = pool.begin().await?;
    let attempt_id = quiz::record_attempt(&mut tx, quiz_id, user_id, &outcome).await?;
    tx.commit().await?;

    Ok(AttemptResult {
        attempt_id,
        score: outcome.score,
        max_score: outcome.max_score,
        passed: outcome.passed(),
    })
}
