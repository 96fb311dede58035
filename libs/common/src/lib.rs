pub mod id;

pub use id::SessionId;
