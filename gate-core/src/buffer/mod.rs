pub mod framed_reader;
pub mod slab;

pub use framed_reader::FramedReader;
pub use slab::SlabPool;
