//! Protocol types shared by the parser, the frame and the application.
//!
//! - [`headers`]: the request and response header collections
//! - [`RequestHead`]: the per-request scratch record filled by the parser
//! - error types: [`HttpError`] at the top, [`BadRequest`] for rejected
//!   requests, and one enum per concern below it

pub mod headers;

mod request;
pub use request::RequestHead;

mod error;
pub use error::BadRequest;
pub use error::BodyError;
pub use error::HeaderError;
pub use error::HttpError;
pub use error::InputError;
pub use error::SendError;
