//! Shared fixtures for the service tests.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    courses, models::{
        AnswerInput, NewChapter, NewCourse, NewOption, NewQuestion, NewQuiz, NewSection, NewVideo,
        Visibility,
    },
    videos,
};

pub async fn user(pool: &SqlitePool, name: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO users (auth_sub, username, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(format!("auth0|{name}"))
    .bind(name)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Video payload with an optional quiz of `questions` three-option questions
/// (first option correct).
pub fn new_video(duration_sec: i64, questions: Option<usize>) -> NewVideo {
    NewVideo {
        title: "intro".into(),
        description: None,
        category_id: None,
        duration_sec,
        visibility: None,
        quiz: questions.map(|n| NewQuiz {
            title: "check".into(),
            questions: (0..n)
                .map(|i| NewQuestion {
                    text: format!("question {i}"),
                    options: vec![
                        NewOption {
                            text: "right".into(),
                            is_correct: true,
                        },
                        NewOption {
                            text: "wrong".into(),
                            is_correct: false,
                        },
                        NewOption {
                            text: "also wrong".into(),
                            is_correct: false,
                        },
                    ],
                })
                .collect(),
        }),
    }
}

pub async fn video_in_category(pool: &SqlitePool, author_id: i64, category_id: i64) -> i64 {
    let mut req = new_video(30, None);
    req.category_id = Some(category_id);
    videos::create_video(pool, author_id, req).await.unwrap().id
}

pub async fn private_video(pool: &SqlitePool, author_id: i64, category_id: i64) -> i64 {
    let mut req = new_video(30, None);
    req.category_id = Some(category_id);
    req.visibility = Some(Visibility::Private);
    videos::create_video(pool, author_id, req).await.unwrap().id
}

/// One course, one chapter, `n` sections each wrapping a fresh 3-question
/// video. Returns the course id and the section videos in order.
pub async fn course_with_sections(
    pool: &SqlitePool,
    author_id: i64,
    n: usize,
) -> (i64, Vec<i64>) {
    let course = courses::create_course(
        pool,
        author_id,
        NewCourse {
            title: "rust from zero".into(),
            description: None,
            category_id: None,
        },
    )
    .await
    .unwrap();

    let chapter = courses::create_chapter(
        pool,
        author_id,
        course.id,
        NewChapter {
            title: "basics".into(),
        },
    )
    .await
    .unwrap();

    let mut video_ids = Vec::new();
    for i in 0..n {
        let video = videos::create_video(pool, author_id, new_video(45, Some(3)))
            .await
            .unwrap();
        courses::create_section(
            pool,
            author_id,
            chapter.id,
            NewSection {
                title: format!("section {i}"),
                video_id: video.id,
            },
        )
        .await
        .unwrap();
        video_ids.push(video.id);
    }

    (course.id, video_ids)
}

pub async fn section_ids(pool: &SqlitePool, course_id: i64) -> Vec<i64> {
    sqlx::query_scalar(
        "SELECT s.id FROM sections s JOIN chapters ch ON s.chapter_id = ch.id
         WHERE ch.course_id = ? ORDER BY ch.position, s.position",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

pub async fn correct_answers_for_video(pool: &SqlitePool, video_id: i64) -> Vec<AnswerInput> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT q.id, o.id
         FROM quizzes z
         JOIN questions q ON q.quiz_id = z.id
         JOIN options o ON o.question_id = q.id AND o.is_correct = 1
         WHERE z.video_id = ?
         ORDER BY q.position",
    )
    .bind(video_id)
    .fetch_all(pool)
    .await
    .unwrap();

    rows.into_iter()
        .map(|(question_id, selected_option_id)| AnswerInput {
            question_id,
            selected_option_id,
        })
        .collect()
}

/// Correct everywhere except the first question, which picks a wrong option.
pub async fn imperfect_answers_for_video(pool: &SqlitePool, video_id: i64) -> Vec<AnswerInput> {
    let mut answers = correct_answers_for_video(pool, video_id).await;

    let wrong_option: i64 = sqlx::query_scalar(
        "SELECT id FROM options WHERE question_id = ? AND is_correct = 0 LIMIT 1",
    )
    .bind(answers[0].question_id)
    .fetch_one(pool)
    .await
    .unwrap();
    answers[0].selected_option_id = wrong_option;

    answers
}
