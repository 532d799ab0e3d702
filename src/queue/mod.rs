pub mod retry_queue;
