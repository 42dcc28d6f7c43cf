mod ask;
mod config;
mod index;
mod status;

pub use ask::AskArgs;
pub use config::ConfigCommand;
pub use index::IndexArgs;

pub use ask::handle_ask;
pub use config::handle_config;
pub use index::handle_index;
pub use status::handle_status;
