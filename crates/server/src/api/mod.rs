pub mod admin;
pub mod audit;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod manuscripts;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
