use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::{
    auth::{self, Principal},
    courses,
    error::AppError,
    feed,
    models::{
        AttemptResult, AttemptSubmission, Chapter, Comment, Course, CourseProgress, CreatedVideo,
        Enrollment, EnrollRequest, FinalExamRequest, FinalExamSummary, NewChapter, NewComment,
        NewCourse, NewSection, NewVideo, PlaybackGrant, Profile, QuizView, Section,
        SectionSubmission, SectionSubmitResult, Video,
    },
    social,
    state::AppState,
    videos,
};

pub fn router(state: Arc<AppState>) -> Router {
    let open = Router::new()
        .route("/videos/{id}/playback", get(playback_handler))
        .route("/videos/{id}/quiz", get(video_quiz_handler))
        .route(
            "/videos/{id}/comments",
            get(list_comments_handler).post(comment_handler),
        )
        .route("/feed/next", get(feed_next_handler))
        .route("/users/{id}/profile", get(profile_handler));

    let protected = Router::new()
        .route("/videos", post(create_video_handler))
        .route("/videos/{id}", delete(delete_video_handler))
        .route(
            "/videos/{id}/like",
            post(like_handler).delete(unlike_handler),
        )
        .route("/videos/{id}/quiz/attempt", post(video_attempt_handler))
        .route("/courses", post(create_course_handler))
        .route("/courses/{id}", delete(delete_course_handler))
        .route("/courses/{id}/publish", post(publish_course_handler))
        .route("/courses/{id}/chapters", post(create_chapter_handler))
        .route("/chapters/{id}/sections", post(create_section_handler))
        .route("/sections/{id}", delete(delete_section_handler))
        .route("/courses/enroll", post(enroll_handler))
        .route("/courses/submit-section-quiz", post(submit_section_handler))
        .route("/courses/{id}/final/generate", post(final_exam_handler))
        .route("/courses/{id}/progress/me", get(my_progress_handler))
        .route(
            "/users/{id}/follow",
            post(follow_handler).delete(unfollow_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_user,
        ));

    open.merge(protected).with_state(state)
}

async fn create_video_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<NewVideo>,
) -> Result<Json<CreatedVideo>, AppError> {
    let video = videos::create_video(&state.pool, principal.user_id, req).await?;
    let upload_url = state
        .signer
        .presign_put(&video.storage_key, state.config.upload_ttl_secs);

    Ok(Json(CreatedVideo { video, upload_url }))
}

async fn playback_handler(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<i64>,
) -> Result<Json<PlaybackGrant>, AppError> {
    let video = videos::get_video(&state.pool, video_id).await?;
    let ttl = state.config.playback_ttl_secs;

    Ok(Json(PlaybackGrant {
        video_id: video.id,
        url: state.signer.presign_get(&video.storage_key, ttl),
        expires_in_secs: ttl,
    }))
}

async fn video_quiz_handler(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<i64>,
) -> Result<Json<QuizView>, AppError> {
    let quiz = videos::get_video_quiz(&state.pool, video_id).await?;
    Ok(Json(quiz))
}

async fn delete_video_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(video_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    videos::delete_video(&state.pool, principal.user_id, video_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(video_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    videos::like(&state.pool, principal.user_id, video_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlike_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(video_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    videos::unlike(&state.pool, principal.user_id, video_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Lives on the open router so the comments path can serve GET without
// credentials; POST authenticates here instead of via the middleware.
async fn comment_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(video_id): Path<i64>,
    Json(req): Json<NewComment>,
) -> Result<Json<Comment>, AppError> {
    let user_id = auth::optional_user(&state.pool, &headers)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let comment = videos::comment(&state.pool, user_id, video_id, req).await?;
    Ok(Json(comment))
}

async fn list_comments_handler(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<i64>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let comments = videos::list_comments(&state.pool, video_id).await?;
    Ok(Json(comments))
}

async fn video_attempt_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(video_id): Path<i64>,
    Json(req): Json<AttemptSubmission>,
) -> Result<Json<AttemptResult>, AppError> {
    let result =
        videos::submit_video_quiz_attempt(&state.pool, principal.user_id, video_id, &req.answers)
            .await?;
    Ok(Json(result))
}

async fn create_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<NewCourse>,
) -> Result<Json<Course>, AppError> {
    let course = courses::create_course(&state.pool, principal.user_id, req).await?;
    Ok(Json(course))
}

async fn delete_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(course_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    courses::delete_course(&state.pool, principal.user_id, course_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(course_id): Path<i64>,
) -> Result<Json<Course>, AppError> {
    let course = courses::publish_course(&state.pool, principal.user_id, course_id).await?;
    Ok(Json(course))
}

async fn create_chapter_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(course_id): Path<i64>,
    Json(req): Json<NewChapter>,
) -> Result<Json<Chapter>, AppError> {
    let chapter = courses::create_chapter(&state.pool, principal.user_id, course_id, req).await?;
    Ok(Json(chapter))
}

async fn create_section_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chapter_id): Path<i64>,
    Json(req): Json<NewSection>,
) -> Result<Json<Section>, AppError> {
    let section = courses::create_section(&state.pool, principal.user_id, chapter_id, req).await?;
    Ok(Json(section))
}

async fn delete_section_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(section_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    courses::delete_section(&state.pool, principal.user_id, section_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<Enrollment>, AppError> {
    let enrollment = courses::enroll(&state.pool, principal.user_id, req.course_id).await?;
    Ok(Json(enrollment))
}

async fn submit_section_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<SectionSubmission>,
) -> Result<Json<SectionSubmitResult>, AppError> {
    let result = courses::submit_section_quiz(
        &state.pool,
        principal.user_id,
        req.section_id,
        &req.answers,
    )
    .await?;
    Ok(Json(result))
}

async fn final_exam_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(course_id): Path<i64>,
    req: Result<Json<FinalExamRequest>, JsonRejection>,
) -> Result<Json<FinalExamSummary>, AppError> {
    // Body is optional; omitting it means "all questions, shuffled".
    let (count, shuffle) = match req {
        Ok(Json(req)) => (req.count, req.shuffle),
        Err(_) => (None, true),
    };

    let summary = courses::generate_final_from_sections(
        &state.pool,
        principal.user_id,
        course_id,
        count,
        shuffle,
    )
    .await?;
    Ok(Json(summary))
}

async fn my_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(course_id): Path<i64>,
) -> Result<Json<CourseProgress>, AppError> {
    let progress = courses::my_progress(&state.pool, principal.user_id, course_id).await?;
    Ok(Json(progress))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedParams {
    category_id: Option<i64>,
    exclude: Option<i64>,
}

async fn feed_next_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> Result<Json<Video>, AppError> {
    let user_id = auth::optional_user(&state.pool, &headers).await?;
    let video =
        feed::next_video(&state.pool, user_id, params.category_id, params.exclude).await?;
    Ok(Json(video))
}

async fn follow_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    social::follow(&state.pool, principal.user_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unfollow_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    social::unfollow(&state.pool, principal.user_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Profile>, AppError> {
    let profile = social::profile(&state.pool, user_id).await?;
    Ok(Json(profile))
}
