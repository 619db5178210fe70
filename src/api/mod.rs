pub mod aggregate;
pub mod client;
pub mod stream;
pub mod topic;
