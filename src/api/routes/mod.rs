//! Route handlers, grouped by resource.

pub mod catalog;
pub mod jobs;
pub mod providers;
pub mod queue;
pub mod search;
pub mod system;

pub use catalog::{bulk_enqueue, catalog_menu, catalog_variants};
pub use jobs::{cancel_job, delete_job, pause_job, resume_job, set_job_priority};
pub use providers::{
    list_providers, pause_provider, provider_status, provider_status_all, resume_provider,
};
pub use queue::{enqueue, job_stats, job_stream, list_jobs, reorder_jobs};
pub use search::search;
pub use system::{health_check, list_notifications, openapi_spec, system_storage};
