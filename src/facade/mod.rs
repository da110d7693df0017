pub mod archiver;

pub use archiver::Archiver;
