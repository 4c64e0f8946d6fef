pub mod layout;
pub mod reader;
pub mod writer;
