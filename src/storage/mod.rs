pub mod compress;
pub mod layout;
pub mod snapshot;
