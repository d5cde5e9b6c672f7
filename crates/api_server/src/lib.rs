//! HTTP/JSON query surface. Methods are addressed by URL path (or by a
//! `method` field in the body when posting to `/`), parameters travel as a
//! JSON `params` object, and dump endpoints answer with raw bytes unless
//! hex wrapping is requested.

pub mod error;
mod handlers;
pub mod json;
pub mod server;

pub use server::{NodeServer, NodeServerBuilder};
