pub mod address;
pub mod builder;
pub mod smtp;
