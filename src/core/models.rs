pub mod activity;
pub mod common;
pub mod form;
pub mod gdpr;
pub mod member;
pub mod organisation;
pub mod schema;
pub mod settings;
pub mod submission;
pub mod template;
pub mod user;
