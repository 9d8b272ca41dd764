//! Content stream parsing, rewriting and colour conversion

pub mod grayscale;
pub mod operator;
pub mod transform;

pub use grayscale::{cmyk_to_gray, rgb_to_gray, GrayscaleOptions, GrayscaleStats, GrayscaleVisitor};
pub use operator::{encode_operators, parse_operators, ContentOperator, ContentStream, Operators, INLINE_IMAGE};
pub use transform::{ColorSpace, ContentTransformer, GraphicsState, OperatorVisitor};
