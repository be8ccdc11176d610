mod client;
mod provider;

pub use provider::{GitLabProvider, ManualTarget};
