mod loader;
mod types;

pub use loader::{ConfigLoader, provider_sections};
pub use types::{ProviderSection, VibesConfig};
