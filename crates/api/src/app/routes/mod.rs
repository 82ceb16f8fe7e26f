use axum::Router;

pub mod jobs;
pub mod projects;
pub mod system;

/// Router for all job and project endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/projects", projects::router())
}
