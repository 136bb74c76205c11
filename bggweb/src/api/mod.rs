//! HTTP API handlers

pub mod export;
pub mod games;
pub mod health;
pub mod jobs;
pub mod sse;
pub mod ui;

pub use games::game_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::job_event_stream;
pub use ui::ui_routes;
