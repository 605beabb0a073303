pub mod codec;
pub mod conflict;
pub mod head;
pub mod matcher;
pub mod sample;
pub mod validate;
