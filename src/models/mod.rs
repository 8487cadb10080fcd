pub mod common;
pub mod progress;
pub mod request;
pub mod response;

pub use common::*;
pub use progress::*;
pub use request::*;
pub use response::*;
