mod settings;

pub use settings::{LogConfig, QueueSettings, Settings, SimulatorConfig};
