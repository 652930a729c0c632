use std::io;

/// Source transformation applied to each input before it is split into
/// statements, such as running an external C preprocessor.
pub trait Preprocess {
    fn preprocess(&self, name: &str, text: String) -> io::Result<String>;
}

/// Hands the source through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Preprocess for Passthrough {
    fn preprocess(&self, _name: &str, text: String) -> io::Result<String> {
        Ok(text)
    }
}
