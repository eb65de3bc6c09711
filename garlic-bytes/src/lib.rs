//! Utilities to decode/encode things into bytes.
//!
//! We use these to build and handle all the byte-encoded objects of
//! the onion-routing protocol: cells, relay messages, handshakes, and
//! link specifiers.  Textual directory documents are handled
//! elsewhere, in `garlic-netstatus`.
//!
//! These tools are generally unsuitable for handling anything bigger
//! than a few kilobytes in size.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

mod err;
mod impls;
mod reader;
mod writer;

pub use err::Error;
pub use reader::Reader;
pub use writer::Writer;

/// Result type returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for an object that can be encoded onto a Writer by reference.
pub trait Writeable {
    /// Encode this object into the writer `b`.
    fn write_onto<B: Writer + ?Sized>(&self, b: &mut B);
}

/// Trait for an object that can be encoded onto a Writer in a way that
/// consumes the original object.
pub trait WriteableOnce {
    /// Encode this object into the writer `b`, consuming it.
    fn write_into<B: Writer + ?Sized>(self, b: &mut B);
}

impl<W: Writeable> WriteableOnce for W {
    fn write_into<B: Writer + ?Sized>(self, b: &mut B) {
        self.write_onto(b);
    }
}

// ----------------------------------------------------------------------

/// Trait for an object that can be extracted from a Reader.
pub trait Readable: Sized {
    /// Try to extract an object of this type from a Reader.
    fn take_from(b: &mut Reader<'_>) -> Result<Self>;
}
