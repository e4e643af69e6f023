//! Content domain: which products and articles get jobs, and who runs them.

pub mod handlers;
pub mod selectors;

pub use handlers::{register_content_handlers, WebhookHandler};
pub use selectors::{ArticleGenerationSelector, ContentPlannerSelector};
