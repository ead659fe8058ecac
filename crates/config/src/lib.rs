// Configuration loading

pub mod settings;

pub use settings::{AutosaveSettings, BatchSettings, ConfigError, PasteSettings, Settings, StoreSettings};
