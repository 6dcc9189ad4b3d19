pub mod bits_reader;
pub mod bytes_errors;
pub mod bytes_reader;
pub mod bytes_writer;
