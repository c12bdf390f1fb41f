mod error;
pub mod relay;
mod shared;
mod singleton;

pub use error::{Error, Result};
pub use relay::{Relay, Stage};
pub use shared::SharedPtr;
pub use singleton::{instance, Singleton};
