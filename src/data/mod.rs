/// Bounds-checked table and string access over a raw file buffer
pub mod parser_utils;
/// Wrappers for loading model files from disk
pub mod wrappers;
/// Positional writer used to re-encode decoded files
pub mod writer;
