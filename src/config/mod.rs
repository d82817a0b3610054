mod settings;

pub use settings::{Config, ServerSettings, Settings};
