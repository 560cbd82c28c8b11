pub mod github;

pub use github::GitHubContentsStore;
