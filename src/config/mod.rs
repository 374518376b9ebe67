mod settings;

pub use settings::{BackendConfig, ChatConfig, LoggingConfig, Settings};
