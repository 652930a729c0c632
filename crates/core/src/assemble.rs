use nes65_eval::Expression;
use nes65_isa6502::inverted_branch;
use nes65_o65::SegmentId;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

use crate::diag::Diagnostic;
use crate::insn::{InstructionParameter, OpcodeChoice, WidthPrefix};
use crate::object::{Object, encode_site};
use crate::parser::{
    Body, HERE_LABEL, LabelItem, RawStatement, Statement, is_branch_reference, parse_raw,
};
use crate::span::{SourceId, Span};

/// Opcode of `jmp abs`.
const JMP_ABSOLUTE: u8 = 0x4C;

/// Byte emitted by `.nop`.
const NOP: u8 = 0xEA;

/// Where one statement landed, for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub span: Span,
    pub segment: SegmentId,
    pub address: u32,
    pub size: u32,
    /// Whether the bytes are an instruction rather than data.
    pub instruction: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelaxError {
    #[error("only a conditional branch to a label can be relaxed, not '{0}'")]
    NotABranch(String),
    #[error("opcode ${0:02X} has no inverse branch")]
    NoInverse(u8),
}

/// Picks the encoding to emit.
///
/// Among certain candidates the shortest wins. Without one, the candidate
/// closest to "every parameter is a word" is taken. Ties go to the earlier
/// candidate.
pub fn select_choice(choices: &[OpcodeChoice]) -> Option<usize> {
    let certain = choices
        .iter()
        .enumerate()
        .filter(|(_, choice)| choice.is_certain)
        .min_by_key(|(_, choice)| choice.total_width());
    if let Some((index, _)) = certain {
        return Some(index);
    }
    choices
        .iter()
        .enumerate()
        .min_by_key(|(_, choice)| choice.baseline_deviation())
        .map(|(index, _)| index)
}

/// Rewrites `bxx target` into `b!xx *+5 : jmp target`.
pub fn relax_branch(choice: &OpcodeChoice) -> Result<OpcodeChoice, RelaxError> {
    let not_a_branch = || RelaxError::NotABranch(choice.to_string());
    let [(1, opcode), (1, target)] = choice.params.as_slice() else {
        return Err(not_a_branch());
    };
    if target.prefix != Some(WidthPrefix::Rel8) {
        return Err(not_a_branch());
    }
    let opcode = opcode
        .expr
        .constant()
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(not_a_branch)?;
    let inverse = inverted_branch(opcode).ok_or(RelaxError::NoInverse(opcode))?;

    let target = InstructionParameter::new(Some(WidthPrefix::AbsWord), target.expr.clone());
    Ok(OpcodeChoice::new(
        vec![
            (1, InstructionParameter::byte(inverse)),
            (1, InstructionParameter::byte(3)),
            (1, InstructionParameter::byte(JMP_ABSOLUTE)),
            (2, target),
        ],
        true,
    ))
}

/// Assembles statements into an [`Object`], one pass at a time.
///
/// Anonymous `+`/`-` labels get unique names containing `#` so that they
/// live in the object's label tables like any other label.
#[derive(Debug, Default)]
pub struct Unit {
    forward: FxHashMap<usize, String>,
    backward: FxHashMap<usize, String>,
    counter: usize,
    ordinal: usize,
    last_span: Option<Span>,
    placements: Vec<Placement>,
}

impl Unit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn into_placements(self) -> Vec<Placement> {
        self.placements
    }

    fn fresh_name(&mut self, sign: char, run: usize) -> String {
        let name = format!("{}#{}", sign.to_string().repeat(run), self.counter);
        self.counter += 1;
        name
    }

    fn forward_name(&mut self, run: usize) -> String {
        if let Some(name) = self.forward.get(&run) {
            return name.clone();
        }
        let name = self.fresh_name('+', run);
        self.forward.insert(run, name.clone());
        name
    }

    fn backward_name(&mut self, run: usize) -> String {
        if let Some(name) = self.backward.get(&run) {
            return name.clone();
        }
        let name = self.fresh_name('-', run);
        self.backward.insert(run, name.clone());
        name
    }

    /// Anonymous labels do not carry over from one file to the next.
    pub fn end_file(&mut self) {
        self.forward.clear();
        self.backward.clear();
    }

    /// Parses and assembles one statement. Parse failures are reported
    /// through the object and the statement is skipped.
    pub fn assemble_raw(&mut self, object: &mut Object, raw: RawStatement<'_>) {
        self.ordinal += 1;
        self.last_span = Some(raw.span);
        object.begin_statement(self.ordinal, raw.span);
        match parse_raw(raw, &*object) {
            Ok(statement) => self.assemble(object, statement),
            Err(diagnostics) => {
                for diagnostic in diagnostics {
                    object.push_diagnostic(diagnostic);
                }
            }
        }
    }

    fn assemble(&mut self, object: &mut Object, mut statement: Statement) {
        let span = statement.span;
        for label in &statement.labels {
            match label {
                LabelItem::Named(label) => object.define_label(&label.name, label.hoist, label.span),
                LabelItem::Forward { run, span } => {
                    let name = self.forward_name(*run);
                    object.define_label(&name, 0, *span);
                    self.forward.remove(run);
                }
                LabelItem::Backward { run, span } => {
                    let name = self.fresh_name('-', *run);
                    self.backward.insert(*run, name.clone());
                    object.define_label(&name, 0, *span);
                }
            }
        }

        let uses_here = self.rename_placeholders(&mut statement);
        if uses_here {
            object.define_label(&self.here_name(), 0, span);
        }

        if let Some(body) = statement.body {
            let segment = object.current_segment();
            let address = object.position();
            let instruction = matches!(body, Body::Instruction { .. });
            self.assemble_body(object, body, span);
            if object.current_segment() == segment && object.position() > address {
                self.placements.push(Placement {
                    span,
                    segment,
                    address,
                    size: object.position() - address,
                    instruction,
                });
            }
        }

        // `*` is only ever referenced by its own statement.
        if uses_here {
            object.undefine_label(&self.here_name());
        }
    }

    fn here_name(&self) -> String {
        format!("{HERE_LABEL}#{}", self.ordinal)
    }

    /// Gives `+`, `-` and `*` references their unique names. Returns whether
    /// `*` was used.
    fn rename_placeholders(&mut self, statement: &mut Statement) -> bool {
        let mut uses_here = false;
        for choice in statement.choices_mut() {
            for param in choice.params_mut() {
                uses_here |= self.rename_in(&mut param.expr);
            }
        }
        if let Some(value) = statement.value_mut() {
            uses_here |= self.rename_in(value);
        }
        uses_here
    }

    fn rename_in(&mut self, expr: &mut Expression) -> bool {
        let mut uses_here = false;
        for name in expr.used_labels() {
            if name == HERE_LABEL {
                expr.rename_label(&name, &self.here_name());
                uses_here = true;
            } else if is_branch_reference(&name) {
                let run = name.len();
                let unique = if name.starts_with('+') {
                    self.forward_name(run)
                } else {
                    self.backward_name(run)
                };
                expr.rename_label(&name, &unique);
            }
        }
        uses_here
    }

    fn assemble_body(&mut self, object: &mut Object, body: Body, span: Span) {
        match body {
            Body::Assign { name, value } => {
                let value = evaluate(object, &value, span).unwrap_or(0);
                object.define_constant(&name.name, name.hoist, value, name.span);
            }
            Body::SetPosition(value) => {
                if let Some(position) = evaluate(object, &value, span) {
                    match u32::try_from(position) {
                        Ok(position) => object.set_position(position),
                        Err(_) => object.push_diagnostic(Diagnostic::error(
                            span,
                            format!("position {position} is out of range"),
                        )),
                    }
                }
            }
            Body::Instruction { mnemonic, choices } => {
                for choice in &choices {
                    trace!(mnemonic, %choice, "candidate");
                }
                let Some(index) = select_choice(&choices) else {
                    object.push_diagnostic(Diagnostic::internal(
                        span,
                        format!("no encoding left for '{mnemonic}'"),
                    ));
                    return;
                };
                let mut choice = choices[index].clone();
                if object.is_relaxed(self.ordinal) {
                    match relax_branch(&choice) {
                        Ok(relaxed) => choice = relaxed,
                        Err(error) => {
                            object.push_diagnostic(Diagnostic::internal(span, error.to_string()))
                        }
                    }
                }
                trace!(mnemonic, %choice, "chosen");
                emit_choice(object, &choice, span);
            }
            Body::Data { choice, .. } => emit_choice(object, &choice, span),
            Body::Nop(count) => {
                let count = match count {
                    Some(count) => evaluate(object, &count, span).unwrap_or(0),
                    None => 1,
                };
                if count < 0 {
                    object.push_diagnostic(Diagnostic::error(
                        span,
                        format!(".nop count must not be negative, got {count}"),
                    ));
                    return;
                }
                for _ in 0..count {
                    object.generate_byte(NOP);
                }
            }
            Body::ScopeOpen => object.start_scope(),
            Body::ScopeClose => {
                if !object.end_scope() {
                    object.push_diagnostic(
                        Diagnostic::error(span, "'.)' without matching '.('")
                            .with_help("remove it or open a scope before it"),
                    );
                }
            }
            Body::Segment(segment) => object.select_segment(segment),
            Body::Link { kind, value } => {
                if let Some(param) = evaluate(object, &value, span) {
                    match u32::try_from(param) {
                        Ok(param) => object.set_linkage(kind, param),
                        Err(_) => object.push_diagnostic(Diagnostic::error(
                            span,
                            format!(".link {} number {param} is out of range", kind.name()),
                        )),
                    }
                }
            }
        }
    }

    /// Ends the pass: closes open scopes and turns leftovers into externs.
    pub fn finish(&mut self, object: &mut Object) {
        let unclosed = object.close_segments();
        if unclosed > 0 {
            let span = self.last_span.unwrap_or(Span::new(SourceId(0), 0, 0));
            object.push_diagnostic(Diagnostic::error(
                span,
                format!("{unclosed} scope(s) still open at end of input"),
            ));
        }
    }
}

fn evaluate(object: &mut Object, value: &Expression, span: Span) -> Option<i64> {
    let result = value.evaluate(|name| object.find_label(name).map(|label| label.value));
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            object.push_diagnostic(Diagnostic::error(span, error.to_string()));
            None
        }
    }
}

fn emit_choice(object: &mut Object, choice: &OpcodeChoice, span: Span) {
    for (width, param) in &choice.params {
        let Some(prefix) = param.prefix.or_else(|| WidthPrefix::for_size(*width)) else {
            object.push_diagnostic(Diagnostic::internal(
                span,
                format!("no operand class for a {width}-byte slot"),
            ));
            continue;
        };

        if prefix == WidthPrefix::Rel8 {
            if param.expr.is_const() {
                object.push_diagnostic(Diagnostic::error(
                    span,
                    "relative target must not be a constant",
                ));
                object.generate_byte(0);
                continue;
            }
        } else if let Some(value) = param.expr.constant() {
            let (bytes, _) = encode_site(prefix, value);
            object.generate_bytes(&bytes);
            continue;
        }

        match param.expr.pointer_shape() {
            Ok((name, addend)) => object.add_extern(prefix, &name, addend),
            Err(error) => object.push_diagnostic(
                Diagnostic::error(span, format!("'{param}' cannot be emitted: {error}"))
                    .with_help("operands must be a constant, a label, or a label plus a constant"),
            ),
        }
    }
}
