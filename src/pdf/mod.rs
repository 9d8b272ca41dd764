//! PDF object model, parsing and serialization

mod dict;
mod filter;
pub mod lexer;
mod object;
pub mod parser;
pub mod reader;
pub mod serialize;
mod stream;
pub mod xref;

pub use dict::Dictionary;
pub use filter::Filter;
pub use object::{Object, ObjectId, StringFormat};
pub use parser::{parse_object, LengthResolver, Parser};
pub use reader::{find_startxref, BaseRevision, Reader};
pub use stream::Stream;
pub use xref::{Location, XRefEntry, XRefKind, XRefSection, XRefTable};
