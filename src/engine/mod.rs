pub mod analyzer;
pub mod ledger;
pub mod rules;
