// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, patch, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, exam, report, submission},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Room for multipart boundaries and text fields on top of the file bytes.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, exams, submissions, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, evaluator).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let single_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;
    let batch_limit = state
        .config
        .max_upload_bytes
        .saturating_mul(state.config.max_batch_files)
        .saturating_add(MULTIPART_OVERHEAD);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .merge(
            Router::new()
                .route("/me", get(auth::me))
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let exam_routes = Router::new()
        .route("/", get(exam::list_exams).post(exam::create_exam))
        .route("/{exam_id}", get(exam::get_exam).delete(exam::delete_exam))
        .route("/{exam_id}/answer-key", put(exam::replace_answer_key))
        .route(
            "/{exam_id}/submissions",
            get(submission::list_submissions)
                .post(submission::create_submission)
                .layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/{exam_id}/submissions/batch",
            post(submission::batch_submissions).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route("/{exam_id}/report", get(report::exam_report))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let submission_routes = Router::new()
        .route(
            "/{id}",
            get(submission::get_submission).delete(submission::delete_submission),
        )
        .route(
            "/{id}/answers/{question_number}",
            patch(submission::override_marks),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/{id}", delete(admin::delete_user))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/exams", exam_routes)
        .nest("/api/submissions", submission_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
