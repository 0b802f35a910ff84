//! Cookie parsing, storage, and request-header assembly.

pub mod jar;

pub use jar::{Cookie, CookieJar};
