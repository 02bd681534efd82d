pub mod admin;
pub mod auth;
pub mod exam;
pub mod report;
pub mod submission;
