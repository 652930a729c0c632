pub mod assemble;
pub mod diag;
pub mod driver;
pub mod insn;
pub mod lexer;
pub mod listing;
pub mod object;
pub mod parser;
pub mod preprocess;
pub mod span;

pub use assemble::{Placement, RelaxError, Unit, relax_branch, select_choice};
pub use diag::{Diagnostic, DiagnosticKind, RenderOptions, Severity};
pub use driver::{
    AssembleError, AssembleOptions, Assembly, DEFAULT_MAX_PASSES, assemble_files, assemble_map,
    assemble_source, read_sources,
};
pub use listing::render_listing;
pub use object::{ExternRef, Fixup, LabelValue, Object, Overflow};
pub use preprocess::{Passthrough, Preprocess};
pub use span::{SourceId, SourceMap, Span};
