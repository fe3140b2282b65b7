//! HTTP接口层

pub mod analyze;
pub mod router;
pub mod select;
pub mod status;

pub use router::create_app_router;
pub use select::ScheduleRequest;
