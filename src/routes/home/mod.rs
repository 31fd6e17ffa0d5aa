mod handler;

pub use handler::index;
