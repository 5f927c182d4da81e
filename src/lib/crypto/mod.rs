pub mod encryption;
pub mod signature;
