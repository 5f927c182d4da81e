pub mod function;
pub mod message;
pub mod policy;
pub mod proof;
pub mod submission;
pub mod transaction;
