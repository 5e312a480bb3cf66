pub mod state;

pub use state::{ClientSettings, ModelSettings, SettingsError, SettingsStore};
