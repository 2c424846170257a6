//! gobake: ahead-of-time startup snapshots for Go `js/wasm` modules.
//!
//! [`Baker::bake`] interprets a module from its `run` export until the
//! runtime is about to call `main.main`, then rewrites the module so that a
//! fresh instance starts at that point:
//!
//! 1. globals are re-initialized to their live values, with the scheduler's
//!    resume global set to the captured resume point;
//! 2. memory is re-emitted as coalesced data segments;
//! 3. package initializers that already ran are emptied;
//! 4. (reserved) recorded host calls are inlined;
//! 5. unused trailing locals are dropped;
//! 6. the compiler's 9-instruction call preamble is folded into `_preCall`.
//!
//! The value-bridge calls made before the break are returned alongside, and
//! [`Baked::glue`] renders them as JavaScript to run before `go.run`.

pub mod baker;
pub mod error;
pub mod glue;
pub mod options;
pub mod report;
pub mod rewrite;
pub mod runner;
pub mod snapshot;

pub use baker::{Baked, Baker};
pub use error::{BakeError, BakeResult};
pub use options::BakeOptions;
pub use report::BakeReport;
pub use runner::{BreakInfo, WellKnown};
