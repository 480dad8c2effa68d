pub mod position_record;
pub mod refill_queue;
