pub mod filter;
pub mod hook;
pub mod identity;
