//! Request handlers.

pub mod clone;
pub mod form;
pub mod health;
pub mod stripe;
pub mod text;
pub mod user;
pub mod video;
pub mod voice;

pub use health::{health, ready, root};
