pub mod alert;
pub mod checkout;
pub mod cleaner;
pub mod cli;
pub mod collector;
pub mod config;
pub mod convert;
pub mod pipeline;
pub mod record;
pub mod remover;
pub mod storage;
pub mod worker;
pub mod writer;
