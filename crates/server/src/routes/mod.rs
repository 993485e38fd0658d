pub mod admin;
pub mod auth;
pub mod companies;
pub mod profile;
pub mod questions;
pub mod reviews;
