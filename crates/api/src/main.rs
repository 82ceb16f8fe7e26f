use labtrace_api::app::{build_app, build_services, Backend};
use labtrace_jobs::WorkerConfig;

#[tokio::main]
async fn main() {
    labtrace_observability::init();

    let backend = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::PgPool::connect(&url)
                .await
                .expect("failed to connect to postgres");
            Backend::Postgres(pool)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; jobs and snapshots will not survive a restart");
            Backend::InMemory
        }
    };

    let mut worker = WorkerConfig::default();
    if let Ok(raw) = std::env::var("LABTRACE_WORKERS") {
        worker.concurrency = raw
            .parse()
            .expect("LABTRACE_WORKERS must be a positive integer");
    }
    if let Ok(raw) = std::env::var("LABTRACE_MAX_ATTEMPTS") {
        worker.retry.max_attempts = raw
            .parse()
            .expect("LABTRACE_MAX_ATTEMPTS must be a positive integer");
    }

    let (services, mut service) = build_services(backend, worker)
        .await
        .expect("failed to wire services");
    service.start().await.expect("failed to start job workers");

    let app = build_app(services);

    let bind = std::env::var("LABTRACE_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();

    service.stop().await;
}
