//! Source hosting access for pull request history.
pub mod config;
pub mod github;
pub mod request;
pub mod traits;

pub use config::RemoteConfig;
pub use github::Github;
pub use request::{ListPrRequest, PullRequest};
pub use traits::PullRequestSource;
