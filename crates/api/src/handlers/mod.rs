pub mod api_keys;
pub mod config;
pub mod corrections;
pub mod dispatcher;
pub mod health;
pub mod jobs;
pub mod queue;
pub mod schemas;
pub mod webhook;
