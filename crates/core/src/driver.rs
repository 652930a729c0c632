use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::assemble::{Placement, Unit};
use crate::diag::{Diagnostic, RenderOptions, has_errors, render_diagnostics_with_options};
use crate::object::Object;
use crate::parser::split_statements;
use crate::preprocess::Preprocess;
use crate::span::{SourceId, SourceMap, Span};

/// Upper bound on assembly passes spent relaxing branches.
pub const DEFAULT_MAX_PASSES: usize = 16;

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Constants defined before the first statement, as with `-D name=value`.
    pub defines: Vec<(String, i64)>,
    pub max_passes: usize,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            defines: Vec::new(),
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

/// Result of assembling a set of sources into one object.
///
/// The object is best effort: it is produced even when `diagnostics`
/// contains errors.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub object: Object,
    pub diagnostics: Vec<Diagnostic>,
    pub source_map: SourceMap,
    pub placements: Vec<Placement>,
    pub passes: usize,
}

impl Assembly {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    pub fn render_diagnostics(&self, options: RenderOptions) -> String {
        render_diagnostics_with_options(&self.source_map, &self.diagnostics, options)
    }

    /// Turns an assembly with errors into an [`AssembleError`].
    pub fn into_result(self) -> Result<Assembly, AssembleError> {
        if !self.has_errors() {
            return Ok(self);
        }
        let rendered = self.render_diagnostics(RenderOptions::plain());
        Err(AssembleError::Failed {
            diagnostics: self.diagnostics,
            rendered,
        })
    }
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("cannot read '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("assembly failed")]
    Failed {
        diagnostics: Vec<Diagnostic>,
        rendered: String,
    },
}

pub fn assemble_source(name: &str, text: &str, options: &AssembleOptions) -> Assembly {
    let mut source_map = SourceMap::default();
    source_map.add_source(name, text);
    assemble_map(source_map, options)
}

/// Reads, preprocesses and assembles `paths` into one object.
///
/// Fails on the first file that cannot be read.
pub fn assemble_files(
    paths: &[PathBuf],
    options: &AssembleOptions,
    preprocess: &dyn Preprocess,
) -> Result<Assembly, AssembleError> {
    let (source_map, errors) = read_sources(paths, preprocess);
    if let Some(error) = errors.into_iter().next() {
        return Err(error);
    }
    Ok(assemble_map(source_map, options))
}

/// Reads and preprocesses every readable file of `paths`, in order.
/// Files that cannot be read are returned as errors and left out.
pub fn read_sources(
    paths: &[PathBuf],
    preprocess: &dyn Preprocess,
) -> (SourceMap, Vec<AssembleError>) {
    let mut source_map = SourceMap::default();
    let mut errors = Vec::new();
    for path in paths {
        let name = path.display().to_string();
        match read_source(path, &name, preprocess) {
            Ok(text) => {
                source_map.add_source(name, text);
            }
            Err(source) => errors.push(AssembleError::Io {
                path: path.clone(),
                source,
            }),
        }
    }
    (source_map, errors)
}

fn read_source(path: &Path, name: &str, preprocess: &dyn Preprocess) -> io::Result<String> {
    let text = std::fs::read_to_string(path)?;
    preprocess.preprocess(name, text)
}

/// Runs passes over every source until no new branch needs relaxing.
pub fn assemble_map(source_map: SourceMap, options: &AssembleOptions) -> Assembly {
    let mut object = Object::new();
    let mut passes = 0;
    let placements = loop {
        passes += 1;
        object.clear_most();
        let unit = run_pass(&source_map, &mut object, options);

        let fresh = object.new_overflows();
        if fresh.is_empty() || passes >= options.max_passes.max(1) {
            break unit.into_placements();
        }
        debug!(pass = passes, branches = ?fresh, "restarting to relax out-of-range branches");
        object.relax(fresh);
    };
    debug!(passes, "object:\n{}", object.dump());

    let mut diagnostics = object.take_diagnostics();
    for overflow in object.overflows().values() {
        let target = overflow.target.split('#').next().unwrap_or_default();
        let mut diagnostic = Diagnostic::error(
            overflow.span,
            format!("branch target '{target}' out of range"),
        );
        if let Some(distance) = overflow.distance {
            diagnostic = diagnostic.with_note(format!("the target is {distance} bytes away"));
        }
        diagnostics.push(diagnostic);
    }

    Assembly {
        object,
        diagnostics,
        source_map,
        placements,
        passes,
    }
}

fn run_pass(source_map: &SourceMap, object: &mut Object, options: &AssembleOptions) -> Unit {
    let command_line = Span::new(SourceId(0), 0, 0);
    for (name, value) in &options.defines {
        object.define_constant(name, 0, *value, command_line);
    }

    let mut unit = Unit::new();
    for source_id in source_map.ids() {
        let Some(file) = source_map.get(source_id) else {
            continue;
        };
        for raw in split_statements(source_id, file) {
            unit.assemble_raw(object, raw);
        }
        unit.end_file();
    }
    unit.finish(object);
    unit
}

#[cfg(test)]
mod tests;
