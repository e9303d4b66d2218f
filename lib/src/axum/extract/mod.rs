pub mod json;
pub mod owner;

pub use json::JsonBody;
pub use owner::Owner;
