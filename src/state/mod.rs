pub mod longwait;
pub mod request;
pub mod transcript;
