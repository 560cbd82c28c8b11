pub mod pin_chain_entries;
pub mod profiles;
