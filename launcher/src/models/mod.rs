pub mod preferences;
pub mod state;
