mod objects;
mod sessions;

pub use objects::StoredObject;
