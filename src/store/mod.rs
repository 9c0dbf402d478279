pub mod keys;
pub mod retry;
