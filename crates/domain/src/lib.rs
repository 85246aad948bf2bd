pub mod entities;
pub mod events;
pub mod repositories;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use repositories::*;
pub use scheduler_errors::{SchedulerError, SchedulerResult};
pub use value_objects::*;
