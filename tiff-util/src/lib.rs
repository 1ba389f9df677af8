pub mod channel;
pub mod colorize;
pub mod draw;
pub mod header;
pub mod ifd;
pub mod mask;
pub mod merge;
pub mod raster;
pub mod stats;
pub mod writer;
