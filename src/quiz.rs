//! Grading and authoring validation shared by the video and course services.
//!
//! Grading is a pure set-membership check: an answer is correct iff it selects
//! the single correct option of its question. The only persistence here is the
//! attempt record itself, which both submit paths write identically.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{
    error::{bad_request, AppError},
    models::{AnswerInput, NewQuestion},
};

/// One correct option per question, in question order.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct AnswerKey {
    pub question_id: i64,
    pub correct_option_id: i64,
}

#[derive(Debug)]
pub struct GradedAnswer {
    pub question_id: i64,
    pub selected_option_id: i64,
    pub is_correct: bool,
}

#[derive(Debug)]
pub struct GradeOutcome {
    pub score: i64,
    pub max_score: i64,
    pub answers: Vec<GradedAnswer>,
}

impl GradeOutcome {
    pub fn passed(&self) -> bool {
        self.score == self.max_score
    }
}

/// Grades a submission against the answer key.
///
/// Extra or missing entries are tolerated: a question with no matching answer
/// counts as incorrect, and only the first answer per question can score, so
/// duplicates never inflate the result. Every submitted answer still gets a
/// graded row for the audit trail.
pub fn grade(key: &[AnswerKey], answers: &[AnswerInput]) -> GradeOutcome {
    let correct_by_question: HashMap<i64, i64> = key
        .iter()
        .map(|k| (k.question_id, k.correct_option_id))
        .collect();

    let mut seen_questions = HashSet::new();
    let mut score = 0;

    let graded = answers
        .iter()
        .map(|answer| {
            let first_for_question = seen_questions.insert(answer.question_id);
            let is_correct = first_for_question
                && correct_by_question.get(&answer.question_id)
                    == Some(&answer.selected_option_id);

            if is_correct {
                score += 1;
            }

            GradedAnswer {
                question_id: answer.question_id,
                selected_option_id: answer.selected_option_id,
                is_correct,
            }
        })
        .collect();

    GradeOutcome {
        score,
        max_score: key.len() as i64,
        answers: graded,
    }
}

/// Loads the correct option of every question in the quiz, in question order.
pub async fn answer_key(
    conn: &mut SqliteConnection,
    quiz_id: i64,
) -> Result<Vec<AnswerKey>, AppError> {
    let key = sqlx::query_as::<_, AnswerKey>(
        "SELECT q.id AS question_id, o.id AS correct_option_id
         FROM questions q
         JOIN options o ON o.question_id = q.id AND o.is_correct = 1
         WHERE q.quiz_id = ?
         ORDER BY q.position",
    )
    .bind(quiz_id)
    .fetch_all(conn)
    .await?;

    Ok(key)
}

/// Writes the immutable attempt record plus one answer row per submitted
/// answer. Runs on the caller's connection so it joins the caller's
/// transaction.
pub async fn record_attempt(
    conn: &mut SqliteConnection,
    quiz_id: i64,
    user_id: i64,
    outcome: &GradeOutcome,
) -> Result<i64, AppError> {
    let attempt_id: i64 = sqlx::query_scalar(
        "INSERT INTO quiz_attempts (quiz_id, user_id, score, max_score, passed, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(quiz_id)
    .bind(user_id)
    .bind(outcome.score)
    .bind(outcome.max_score)
    .bind(outcome.passed())
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    for answer in &outcome.answers {
        sqlx::query(
            "INSERT INTO quiz_answers (attempt_id, question_id, selected_option_id, is_correct)
             VALUES (?, ?, ?, ?)",
        )
        .bind(attempt_id)
        .bind(answer.question_id)
        .bind(answer.selected_option_id)
        .bind(answer.is_correct)
        .execute(&mut *conn)
        .await?;
    }

    Ok(attempt_id)
}

/// Authoring-time validation, run before any row is written.
pub fn validate_questions(questions: &[NewQuestion]) -> Result<(), AppError> {
    if questions.is_empty() {
        return Err(bad_request("quiz has no questions"));
    }

    for (index, question) in questions.iter().enumerate() {
        if question.text.trim().is_empty() {
            return Err(bad_request(format!("question {} has empty text", index + 1)));
        }
        if question.options.len() < 2 {
            return Err(bad_request(format!(
                "question {} needs at least 2 options",
                index + 1
            )));
        }

        let correct = question.options.iter().filter(|o| o.is_correct).count();
        if correct != 1 {
            return Err(bad_request(format!(
                "question {} must have exactly one correct option, found {correct}",
                index + 1
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOption;

    fn key() -> Vec<AnswerKey> {
        vec![
            AnswerKey {
                question_id: 1,
                correct_option_id: 11,
            },
            AnswerKey {
                question_id: 2,
                correct_option_id: 22,
            },
            AnswerKey {
                question_id: 3,
                correct_option_id: 33,
            },
        ]
    }

    fn answer(question_id: i64, selected_option_id: i64) -> AnswerInput {
        AnswerInput {
            question_id,
            selected_option_id,
        }
    }

    #[test]
    fn score_counts_exact_matches_only() {
        let outcome = grade(&key(), &[answer(1, 11), answer(2, 21), answer(3, 33)]);

        assert_eq!(outcome.score, 2);
        assert_eq!(outcome.max_score, 3);
        assert!(!outcome.passed());
        assert!(outcome.answers[0].is_correct);
        assert!(!outcome.answers[1].is_correct);
        assert!(outcome.answers[2].is_correct);
    }

    #[test]
    fn missing_answers_count_as_incorrect() {
        let outcome = grade(&key(), &[answer(2, 22)]);

        assert_eq!(outcome.score, 1);
        assert_eq!(outcome.max_score, 3);
    }

    #[test]
    fn duplicate_answers_cannot_inflate_score() {
        let outcome = grade(&key(), &[answer(1, 12), answer(1, 11), answer(1, 11)]);

        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.answers.len(), 3);
    }

    #[test]
    fn unknown_questions_never_score() {
        let outcome = grade(&key(), &[answer(99, 11)]);

        assert_eq!(outcome.score, 0);
        assert!(!outcome.answers[0].is_correct);
    }

    #[test]
    fn perfect_submission_passes() {
        let outcome = grade(&key(), &[answer(1, 11), answer(2, 22), answer(3, 33)]);

        assert_eq!(outcome.score, 3);
        assert!(outcome.passed());
    }

    fn question(correct_flags: &[bool]) -> NewQuestion {
        NewQuestion {
            text: "What is ownership?".into(),
            options: correct_flags
                .iter()
                .map(|&is_correct| NewOption {
                    text: "an option".into(),
                    is_correct,
                })
                .collect(),
        }
    }

    #[test]
    fn exactly_one_correct_option_required() {
        assert!(validate_questions(&[question(&[true, false])]).is_ok());
        assert!(validate_questions(&[question(&[false, false])]).is_err());
        assert!(validate_questions(&[question(&[true, true, false])]).is_err());
    }

    #[test]
    fn too_few_options_rejected() {
        assert!(validate_questions(&[question(&[true])]).is_err());
    }

    // A zero-question quiz would trivially "pass" every attempt (0 == 0).
    #[test]
    fn empty_question_list_rejected() {
        assert!(validate_questions(&[]).is_err());
    }
}
