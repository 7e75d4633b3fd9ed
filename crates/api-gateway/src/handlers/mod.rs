//! Request handlers for API endpoints

pub mod health;
pub mod webhooks;

pub use health::*;
pub use webhooks::{__path_github_webhook, __path_slack_webhook, github_webhook, slack_webhook};
