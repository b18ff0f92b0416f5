pub mod api_key;
pub mod job;
pub mod queue_item;
