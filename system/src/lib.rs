mod document;
mod message;
mod operation;
mod types;

pub use document::*;
pub use message::*;
pub use operation::*;
pub use types::*;

pub extern crate chrono;
pub extern crate serde;
pub extern crate serde_json;
pub extern crate uuid;
