pub mod blob;
pub mod catalog;
pub mod ledger;
