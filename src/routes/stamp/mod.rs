mod handler;
pub mod model;

pub use handler::{create, delete, delete_image, edit, index, show, store, update};
