//! Integer encodings used for the block's columnar data

pub mod delta;
