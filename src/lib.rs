pub mod audit;
pub mod availability;
pub mod campaign;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod extract;
pub mod lock;
pub mod logging;
pub mod project_index;
pub mod recovery;
pub mod settings;
pub mod signals;
pub mod stage;
pub mod store;
pub mod walk;
pub mod workspace;
