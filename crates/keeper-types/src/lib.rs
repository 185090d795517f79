pub mod contracts;
pub mod events;
pub mod order;
pub mod transaction;
pub mod uid;

pub use events::*;
pub use order::*;
pub use transaction::*;
pub use uid::*;
