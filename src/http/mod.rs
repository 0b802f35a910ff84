//! HTTP/1.x message handling: wire framing, auth, redirects, bodies.

pub mod auth;
pub mod body;
pub mod headers;
pub mod parser;
pub mod redirect;
pub mod request;
pub mod response;
pub mod serializer;

pub use body::{ByteStream, FileStream, MemoryStream};
pub use headers::HeaderMap;
pub use request::{HookAction, HttpVersion, Method, Request};
pub use response::{Info, Response};
