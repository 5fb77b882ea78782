/// Memory-mapped model triples
pub mod mmap;
