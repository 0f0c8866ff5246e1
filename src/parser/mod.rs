pub mod boundary;
mod headers;
pub mod mjpeg;
mod scanner;

pub use boundary::Boundary;
pub use mjpeg::{Discard, FrameSink, MjpegParser, Mode, ParserOptions};
