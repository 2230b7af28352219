//! Model input preparation shared by detector backends

pub mod preprocessing;
pub mod tokenizer;

pub use preprocessing::{ImagePreprocessor, PaddedGeometry};
pub use tokenizer::{ClipTokenizer, EncodedPrompts};
