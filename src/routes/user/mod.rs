mod handler;
pub mod model;

pub use handler::{authenticate, login, logout, register, store};
