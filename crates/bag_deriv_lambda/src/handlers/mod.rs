pub mod consumer;
pub mod sqs_event;
pub mod work_item;
