//! OpenAPI document assembly.

use utoipa::OpenApi;

/// OpenAPI 3.1 documentation for the REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "media-dl API",
        description = "Multi-user media download orchestration API",
        license(name = "MIT OR Apache-2.0")
    ),
    paths(
        crate::api::routes::queue::enqueue,
        crate::api::routes::queue::list_jobs,
        crate::api::routes::queue::job_stats,
        crate::api::routes::queue::reorder_jobs,
        crate::api::routes::queue::job_stream,
        crate::api::routes::jobs::cancel_job,
        crate::api::routes::jobs::pause_job,
        crate::api::routes::jobs::resume_job,
        crate::api::routes::jobs::set_job_priority,
        crate::api::routes::jobs::delete_job,
        crate::api::routes::providers::list_providers,
        crate::api::routes::providers::pause_provider,
        crate::api::routes::providers::resume_provider,
        crate::api::routes::providers::provider_status,
        crate::api::routes::providers::provider_status_all,
        crate::api::routes::search::search,
        crate::api::routes::catalog::catalog_menu,
        crate::api::routes::catalog::catalog_variants,
        crate::api::routes::catalog::bulk_enqueue,
        crate::api::routes::system::health_check,
        crate::api::routes::system::system_storage,
        crate::api::routes::system::list_notifications,
        crate::api::routes::system::openapi_spec,
    ),
    components(schemas(
        crate::api::routes::queue::EnqueueRequest,
        crate::api::routes::queue::EnqueueOptions,
        crate::api::routes::queue::ReorderRequest,
        crate::api::routes::jobs::PriorityRequest,
        crate::api::routes::providers::PauseProviderRequest,
        crate::api::routes::catalog::BulkRequest,
        crate::error::ApiError,
        crate::error::ErrorDetail,
        crate::types::JobId,
        crate::types::JobInfo,
        crate::types::JobStatus,
        crate::types::Category,
        crate::types::QueueItem,
        crate::types::QueueStats,
        crate::types::BulkItem,
        crate::types::BulkTaskInfo,
        crate::types::BulkTaskStatus,
        crate::types::Event,
        crate::providers::SearchItem,
        crate::providers::MenuPage,
        crate::providers::MenuItem,
        crate::providers::MenuItemKind,
        crate::providers::Variant,
        crate::providers::ProviderStatus,
        crate::coordination::PauseEntry,
        crate::coordination::BackoffEntry,
        crate::coordination::CoordinationEntry,
        crate::catalog::CacheInfo,
        crate::orchestrator::SearchHit,
        crate::orchestrator::SearchError,
        crate::utils::DiskUsage,
    )),
    tags(
        (name = "queue", description = "Queue submission, listing, and events"),
        (name = "jobs", description = "Per-job control"),
        (name = "providers", description = "Provider administration"),
        (name = "search", description = "Catalog search"),
        (name = "catalog", description = "Catalog browsing and bulk intake"),
        (name = "system", description = "Health, storage, and notifications"),
    )
)]
pub struct ApiDoc;
