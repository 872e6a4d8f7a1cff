pub mod cassette_store;
pub mod signing;
pub mod vcr;

pub use cassette_store::CassetteStore;
pub use vcr::{Vcr, VcrMode};
