//! Course service: authoring, enrollment, section grading, progress.
//!
//! A section wraps exactly one video, whose quiz must carry at least three
//! questions at section creation. Completing a section means a perfect score
//! on its most recent attempt; there is no partial-credit threshold. Course
//! progress is always recomputed from the section-progress rows, never
//! patched incrementally, so it stays correct when the author reshapes the
//! course after learners have started.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    error::{bad_request, AppError},
    models::{
        AnswerInput, Chapter, Course, CourseProgress, Enrollment, FinalExamSummary, NewChapter,
        NewCourse, NewSection, Section, SectionProgress, SectionSubmitResult,
    },
    quiz,
};

pub const MIN_SECTION_QUIZ_QUESTIONS: i64 = 3;

pub async fn create_course(
    pool: &SqlitePool,
    author_id: i64,
    req: NewCourse,
) -> Result<Course, AppError> {
    if req.title.trim().is_empty() {
        return Err(bad_request("course title is empty"));
    }

    let course = sqlx::query_as::<_, Course>(
        "INSERT INTO courses (author_id, category_id, title, description, published)
         VALUES (?, ?, ?, ?, 0)
         RETURNING *",
    )
    .bind(author_id)
    .bind(req.category_id)
    .bind(&req.title)
    .bind(&req.description)
    .fetch_one(pool)
    .await?;

    Ok(course)
}

pub async fn get_course(pool: &SqlitePool, course_id: i64) -> Result<Course, AppError> {
    sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = ?")
        .bind(course_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("course"))
}

async fn owned_course(
    pool: &SqlitePool,
    author_id: i64,
    course_id: i64,
) -> Result<Course, AppError> {
    let course = get_course(pool, course_id).await?;
    if course.author_id != author_id {
        return Err(AppError::Forbidden("course"));
    }
    Ok(course)
}

pub async fn publish_course(
    pool: &SqlitePool,
    author_id: i64,
    course_id: i64,
) -> Result<Course, AppError> {
    owned_course(pool, author_id, course_id).await?;

    let course =
        sqlx::query_as::<_, Course>("UPDATE courses SET published = 1 WHERE id = ? RETURNING *")
            .bind(course_id)
            .fetch_one(pool)
            .await?;

    Ok(course)
}

pub async fn delete_course(
    pool: &SqlitePool,
    author_id: i64,
    course_id: i64,
) -> Result<(), AppError> {
    owned_course(pool, author_id, course_id).await?;

    sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_chapter(
    pool: &SqlitePool,
    author_id: i64,
    course_id: i64,
    req: NewChapter,
) -> Result<Chapter, AppError> {
    owned_course(pool, author_id, course_id).await?;

    let chapter = sqlx::query_as::<_, Chapter>(
        "INSERT INTO chapters (course_id, position, title)
         VALUES (?, (SELECT COALESCE(MAX(position) + 1, 0) FROM chapters WHERE course_id = ?), ?)
         RETURNING *",
    )
    .bind(course_id)
    .bind(course_id)
    .bind(&req.title)
    .fetch_one(pool)
    .await?;

    Ok(chapter)
}

pub async fn create_section(
    pool: &SqlitePool,
    author_id: i64,
    chapter_id: i64,
    req: NewSection,
) -> Result<Section, AppError> {
    let course_id: i64 = sqlx::query_scalar("SELECT course_id FROM chapters WHERE id = ?")
        .bind(chapter_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("chapter"))?;
    owned_course(pool, author_id, course_id).await?;

    let question_count: Option<i64> = sqlx::query_scalar(
        "SELECT COUNT(q.id)
         FROM videos v
         LEFT JOIN quizzes z ON z.video_id = v.id
         LEFT JOIN questions q ON q.quiz_id = z.id
         WHERE v.id = ?
         GROUP BY v.id",
    )
    .bind(req.video_id)
    .fetch_optional(pool)
    .await?;

    let question_count = question_count.ok_or(AppError::NotFound("video"))?;
    if question_count < MIN_SECTION_QUIZ_QUESTIONS {
        return Err(bad_request(format!(
            "section video quiz needs at least {MIN_SECTION_QUIZ_QUESTIONS} questions, found {question_count}"
        )));
    }

    let section = sqlx::query_as::<_, Section>(
        "INSERT INTO sections (chapter_id, position, title, video_id)
         VALUES (?, (SELECT COALESCE(MAX(position) + 1, 0) FROM sections WHERE chapter_id = ?), ?, ?)
         RETURNING *",
    )
    .bind(chapter_id)
    .bind(chapter_id)
    .bind(&req.title)
    .bind(req.video_id)
    .fetch_one(pool)
    .await?;

    Ok(section)
}

pub async fn delete_section(
    pool: &SqlitePool,
    author_id: i64,
    section_id: i64,
) -> Result<(), AppError> {
    let course_id: i64 = sqlx::query_scalar(
        "SELECT ch.course_id FROM sections s JOIN chapters ch ON s.chapter_id = ch.id
         WHERE s.id = ?",
    )
    .bind(section_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("section"))?;
    owned_course(pool, author_id, course_id).await?;

    sqlx::query("DELETE FROM sections WHERE id = ?")
        .bind(section_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Idempotent enroll: the first call creates the row, later calls return it
/// unchanged (`started_at` is never reset).
pub async fn enroll(
    pool: &SqlitePool,
    user_id: i64,
    course_id: i64,
) -> Result<Enrollment, AppError> {
    get_course(pool, course_id).await?;

    sqlx::query(
        "INSERT INTO course_enrollments (user_id, course_id, status, progress_pct, started_at)
         VALUES (?, ?, 'IN_PROGRESS', 0, ?)
         ON CONFLICT (user_id, course_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let enrollment = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM course_enrollments WHERE user_id = ? AND course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(enrollment)
}

#[derive(sqlx::FromRow)]
struct SectionContext {
    video_id: i64,
    course_id: i64,
}

/// Grades one section-quiz submission and advances the learner's course state.
///
/// The four side effects (attempt insert, section-progress upsert, enrollment
/// upsert, progress recompute) commit as one transaction; a reader never sees
/// a recorded attempt without the matching progress row. Re-submitting is
/// safe: attempts append, section progress is last-attempt-wins.
pub async fn submit_section_quiz(
    pool: &SqlitePool,
    user_id: i64,
    section_id: i64,
    answers: &[AnswerInput],
) -> Result<SectionSubmitResult, AppError> {
    let ctx = sqlx::query_as::<_, SectionContext>(
        "SELECT s.video_id, ch.course_id
         FROM sections s JOIN chapters ch ON s.chapter_id = ch.id
         WHERE s.id = ?",
    )
    .bind(section_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("section"))?;

    let quiz_id: i64 = sqlx::query_scalar("SELECT id FROM quizzes WHERE video_id = ?")
        .bind(ctx.video_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| bad_request("section video has no quiz"))?;

    let key = {
        let mut conn = pool.acquire().await?;
        quiz::answer_key(&mut conn, quiz_id).await?
    };
    let outcome = quiz::grade(&key, answers);
    let completed = outcome.passed();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let attempt_id = quiz::record_attempt(&mut tx, quiz_id, user_id, &outcome).await?;

    sqlx::query(
        "INSERT INTO section_progress
             (user_id, section_id, score, max_score, completed_at, last_attempt_id)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (user_id, section_id) DO UPDATE SET
             score = excluded.score,
             max_score = excluded.max_score,
             completed_at = excluded.completed_at,
             last_attempt_id = excluded.last_attempt_id",
    )
    .bind(user_id)
    .bind(section_id)
    .bind(outcome.score)
    .bind(outcome.max_score)
    .bind(completed.then_some(now))
    .bind(attempt_id)
    .execute(&mut *tx)
    .await?;

    // A learner who arrived through the feed may never have enrolled.
    sqlx::query(
        "INSERT INTO course_enrollments (user_id, course_id, status, progress_pct, started_at)
         VALUES (?, ?, 'IN_PROGRESS', 0, ?)
         ON CONFLICT (user_id, course_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(ctx.course_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let progress_pct = recompute_progress(&mut tx, user_id, ctx.course_id, now).await?;

    tx.commit().await?;

    debug!(
        "user {user_id} section {section_id}: {}/{} ({progress_pct}% of course {})",
        outcome.score, outcome.max_score, ctx.course_id
    );

    Ok(SectionSubmitResult {
        attempt_id,
        score: outcome.score,
        max_score: outcome.max_score,
        completed_section: completed,
        progress_pct,
    })
}

/// Recomputes the enrollment aggregate over all sections of the course,
/// inside the caller's transaction.
async fn recompute_progress(
    conn: &mut sqlx::SqliteConnection,
    user_id: i64,
    course_id: i64,
    now: DateTime<Utc>,
) -> Result<i64, AppError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sections s JOIN chapters ch ON s.chapter_id = ch.id
         WHERE ch.course_id = ?",
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let completed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM section_progress sp
         JOIN sections s ON sp.section_id = s.id
         JOIN chapters ch ON s.chapter_id = ch.id
         WHERE ch.course_id = ? AND sp.user_id = ? AND sp.completed_at IS NOT NULL",
    )
    .bind(course_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    // Integer division floors, matching the 0-100 integer contract.
    let progress_pct = if total == 0 { 0 } else { 100 * completed / total };
    let course_done = progress_pct == 100;

    sqlx::query(
        "UPDATE course_enrollments SET
             progress_pct = ?,
             status = CASE WHEN ? THEN 'COMPLETED' ELSE 'IN_PROGRESS' END,
             completed_at = CASE WHEN ? THEN ? ELSE NULL END
         WHERE user_id = ? AND course_id = ?",
    )
    .bind(progress_pct)
    .bind(course_done)
    .bind(course_done)
    .bind(now)
    .bind(user_id)
    .bind(course_id)
    .execute(&mut *conn)
    .await?;

    Ok(progress_pct)
}

pub async fn my_progress(
    pool: &SqlitePool,
    user_id: i64,
    course_id: i64,
) -> Result<CourseProgress, AppError> {
    get_course(pool, course_id).await?;

    let enrollment = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM course_enrollments WHERE user_id = ? AND course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("enrollment"))?;

    let sections = sqlx::query_as::<_, SectionProgress>(
        "SELECT sp.*
         FROM section_progress sp
         JOIN sections s ON sp.section_id = s.id
         JOIN chapters ch ON s.chapter_id = ch.id
         WHERE ch.course_id = ? AND sp.user_id = ?
         ORDER BY ch.position, s.position",
    )
    .bind(course_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(CourseProgress {
        enrollment,
        sections,
    })
}

#[derive(sqlx::FromRow)]
struct PoolQuestion {
    id: i64,
    text: String,
}

/// Builds the course's final exam by deep-copying every question of every
/// section-video quiz. The copy owns fresh ids, so later edits to section
/// quizzes never leak into an already-generated exam. Re-generating replaces
/// the previous exam.
pub async fn generate_final_from_sections(
    pool: &SqlitePool,
    author_id: i64,
    course_id: i64,
    count: Option<usize>,
    shuffle: bool,
) -> Result<FinalExamSummary, AppError> {
    let course = owned_course(pool, author_id, course_id).await?;

    let mut questions = sqlx::query_as::<_, PoolQuestion>(
        "SELECT q.id, q.text
         FROM questions q
         JOIN quizzes z ON q.quiz_id = z.id
         JOIN sections s ON s.video_id = z.video_id
         JOIN chapters ch ON s.chapter_id = ch.id
         WHERE ch.course_id = ?
         ORDER BY ch.position, s.position, q.position",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    if questions.is_empty() {
        return Err(bad_request("course has no section quiz questions"));
    }

    if shuffle {
        questions.shuffle(&mut rand::thread_rng());
    }
    if let Some(count) = count {
        questions.truncate(count.min(questions.len()));
    }

    let mut tx = pool.begin().await?;

    // Detach rather than delete any previous exam so its attempt history
    // stays intact.
    sqlx::query("UPDATE quizzes SET course_id = NULL WHERE course_id = ?")
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

    let quiz_id: i64 =
        sqlx::query_scalar("INSERT INTO quizzes (course_id, title) VALUES (?, ?) RETURNING id")
            .bind(course_id)
            .bind(format!("{} final exam", course.title))
            .fetch_one(&mut *tx)
            .await?;

    for (position, source) in questions.iter().enumerate() {
        let question_id: i64 = sqlx::query_scalar(
            "INSERT INTO questions (quiz_id, position, text) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(quiz_id)
        .bind(position as i64)
        .bind(&source.text)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO options (question_id, position, text, is_correct)
             SELECT ?, position, text, is_correct FROM options
             WHERE question_id = ? ORDER BY position",
        )
        .bind(question_id)
        .bind(source.id)
        .execute(&mut *tx)
        .await?;
    }

    let question_count = questions.len();
    tx.commit().await?;

    Ok(FinalExamSummary {
        quiz_id,
        question_count,
    })
}
