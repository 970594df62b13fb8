pub mod callsheet;
pub mod events;
pub mod sessions;
pub mod signals;
