//! gobake module codec.
//!
//! Converts between `.wasm` bytes and the [`gobake_types::Module`] AST:
//!
//! ```text
//! bytes ──wasmparser──▶ Module ──wasm-encoder──▶ bytes (validated)
//! ```
//!
//! Only the feature subset the rest of gobake understands is accepted; any
//! other construct is rejected with [`CodecError::Unsupported`] rather than
//! silently dropped.

pub mod decode;
pub mod encode;
pub mod error;

pub use decode::decode;
pub use encode::encode;
pub use error::{CodecError, CodecResult};
