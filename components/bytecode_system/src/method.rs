//! Compiled code objects.
//!
//! A [`CompiledMethod`] owns its literal pool, instruction vector and block
//! descriptors; a [`CompiledBlock`] is a window into the owning method's
//! instructions and shares its literal pool through the closure that carries
//! the method reference at run time.

use core_types::{Assumption, ClassId, Selector, Value};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::opcode::Opcode;

/// Operand-stack slack reserved beyond declared temporaries.
const SMALL_FRAME_SLOTS: usize = 16;
const LARGE_FRAME_SLOTS: usize = 56;

/// An entry in a method's literal pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// A literal value (nil, number, character, or a reference to a heap
    /// object such as a symbol or literal array)
    Value(Value),
    /// A message selector used by send instructions
    Selector(Selector),
}

/// Descriptor for a block embedded in a method.
///
/// The block's body lives inside the owning method's instruction vector as
/// the half-open window `[offset, offset + len)`, immediately following its
/// `PushClosure` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledBlock {
    /// Arguments the block expects
    pub num_args: u8,
    /// Outer values copied into the closure at creation
    pub num_copied: u8,
    /// First instruction of the body within the owner's code
    pub offset: u32,
    /// Body length in instructions
    pub len: u32,
}

/// A compiled method: literal pool, bytecode and header.
pub struct CompiledMethod {
    label: String,
    literals: Vec<Literal>,
    code: Vec<Opcode>,
    num_args: u8,
    num_temps: u8,
    large_frame: bool,
    primitive: Option<u16>,
    blocks: Vec<CompiledBlock>,
    holder: Cell<Option<ClassId>>,
    stable: Assumption,
}

impl CompiledMethod {
    /// Human-readable label used in logging and diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Declared argument count.
    pub fn num_args(&self) -> usize {
        self.num_args as usize
    }

    /// Declared temporaries beyond the arguments.
    pub fn num_temps(&self) -> usize {
        self.num_temps as usize
    }

    /// Frame slot capacity: arguments, temporaries and operand stack slack.
    pub fn frame_capacity(&self) -> usize {
        let slack = if self.large_frame {
            LARGE_FRAME_SLOTS
        } else {
            SMALL_FRAME_SLOTS
        };
        self.num_args as usize + self.num_temps as usize + slack
    }

    /// Index into the external primitive table, if this method has a
    /// primitive fast path.
    pub fn primitive(&self) -> Option<u16> {
        self.primitive
    }

    /// The instruction vector.
    pub fn code(&self) -> &[Opcode] {
        &self.code
    }

    /// The literal pool.
    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    /// The literal at `index`, if in range.
    pub fn literal(&self, index: usize) -> Option<&Literal> {
        self.literals.get(index)
    }

    /// Block descriptor table.
    pub fn blocks(&self) -> &[CompiledBlock] {
        &self.blocks
    }

    /// The block descriptor at `index`, if in range.
    pub fn block(&self, index: usize) -> Option<CompiledBlock> {
        self.blocks.get(index).copied()
    }

    /// Class this method is installed in, once installed.
    pub fn holder(&self) -> Option<ClassId> {
        self.holder.get()
    }

    /// Record the class this method was installed in.
    pub fn set_holder(&self, class: ClassId) {
        self.holder.set(Some(class));
    }

    /// Call-target stability flag. Valid until the method is replaced in a
    /// method dictionary; call-site caches hold a clone and drop the target
    /// once it goes invalid.
    pub fn call_target_stable(&self) -> &Assumption {
        &self.stable
    }

    /// Invalidate every cached call target for this method.
    pub fn invalidate_call_target(&self) {
        self.stable.invalidate();
    }

    /// Whether the fallback code begins by storing the primitive failure
    /// reason into a temporary. The engine pushes the reason only for
    /// methods compiled this way.
    pub fn expects_primitive_error_code(&self) -> bool {
        self.primitive.is_some()
            && matches!(
                self.code.first(),
                Some(Opcode::PopIntoTemp(_)) | Some(Opcode::StoreTemp(_))
            )
    }
}

impl fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMethod")
            .field("label", &self.label)
            .field("num_args", &self.num_args)
            .field("num_temps", &self.num_temps)
            .field("primitive", &self.primitive)
            .field("code_len", &self.code.len())
            .field("literals", &self.literals.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

/// Incremental builder for [`CompiledMethod`]s.
///
/// # Examples
///
/// ```
/// use bytecode_system::{MethodBuilder, Opcode};
///
/// let method = MethodBuilder::new("Answer>>forty-two")
///     .build(|b| {
///         b.emit(Opcode::PushSmallInt(42));
///         b.emit(Opcode::ReturnTop);
///     });
/// assert_eq!(method.code().len(), 2);
/// assert_eq!(method.num_args(), 0);
/// ```
pub struct MethodBuilder {
    label: String,
    num_args: u8,
    num_temps: u8,
    large_frame: bool,
    primitive: Option<u16>,
    literals: Vec<Literal>,
    code: Vec<Opcode>,
    blocks: Vec<CompiledBlock>,
    open_blocks: Vec<usize>,
}

impl MethodBuilder {
    /// Start building a method with the given diagnostic label.
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            num_args: 0,
            num_temps: 0,
            large_frame: false,
            primitive: None,
            literals: Vec::new(),
            code: Vec::new(),
            blocks: Vec::new(),
            open_blocks: Vec::new(),
        }
    }

    /// Set the declared argument count.
    pub fn num_args(mut self, n: u8) -> Self {
        self.num_args = n;
        self
    }

    /// Set the number of temporaries beyond the arguments.
    pub fn num_temps(mut self, n: u8) -> Self {
        self.num_temps = n;
        self
    }

    /// Request the large frame size for deeply-nesting methods.
    pub fn large_frame(mut self) -> Self {
        self.large_frame = true;
        self
    }

    /// Attach a primitive index; the bytecode becomes the fallback path.
    pub fn primitive(mut self, index: u16) -> Self {
        self.primitive = Some(index);
        self
    }

    /// Emit the method body through `f` and finish.
    pub fn build(mut self, f: impl FnOnce(&mut Self)) -> Rc<CompiledMethod> {
        f(&mut self);
        self.finish()
    }

    /// Add a literal, reusing an existing equal entry.
    pub fn add_literal(&mut self, literal: Literal) -> u16 {
        if let Some(found) = self.literals.iter().position(|l| *l == literal) {
            return found as u16;
        }
        let index = self.literals.len() as u16;
        self.literals.push(literal);
        index
    }

    /// Add a selector literal.
    pub fn add_selector(&mut self, selector: Selector) -> u16 {
        self.add_literal(Literal::Selector(selector))
    }

    /// Append an instruction and return its index.
    pub fn emit(&mut self, opcode: Opcode) -> usize {
        let pc = self.code.len();
        self.code.push(opcode);
        pc
    }

    /// Current instruction index; the next `emit` lands here.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Emit a send of `selector` with `num_args` arguments.
    pub fn emit_send(&mut self, selector: Selector, num_args: u8) -> usize {
        let index = self.add_selector(selector);
        self.emit(Opcode::Send { selector: index, num_args })
    }

    /// Rewrite the jump at `at` to target `target`.
    ///
    /// # Panics
    ///
    /// Panics when the instruction at `at` is not a jump.
    pub fn patch_jump(&mut self, at: usize, target: usize) {
        let target = target as u32;
        match &mut self.code[at] {
            Opcode::Jump(t) | Opcode::JumpIfTrue(t) | Opcode::JumpIfFalse(t) => *t = target,
            other => panic!("patch_jump at {} expects a jump, found {:?}", at, other),
        }
    }

    /// Open a block: emits `PushClosure` and starts recording its body.
    /// Returns the block descriptor index.
    pub fn begin_block(&mut self, num_args: u8, num_copied: u8) -> u16 {
        let index = self.blocks.len();
        self.emit(Opcode::PushClosure { block: index as u16 });
        self.blocks.push(CompiledBlock {
            num_args,
            num_copied,
            offset: self.code.len() as u32,
            len: 0,
        });
        self.open_blocks.push(index);
        index as u16
    }

    /// Close the innermost open block, fixing its body window.
    ///
    /// # Panics
    ///
    /// Panics when no block is open.
    pub fn end_block(&mut self) {
        let index = self
            .open_blocks
            .pop()
            .expect("end_block without a matching begin_block");
        let block = &mut self.blocks[index];
        block.len = self.code.len() as u32 - block.offset;
    }

    /// Finish the method.
    ///
    /// # Panics
    ///
    /// Panics when a block is still open or a jump targets an instruction
    /// outside the method.
    pub fn finish(self) -> Rc<CompiledMethod> {
        assert!(
            self.open_blocks.is_empty(),
            "method {:?} finished with an open block",
            self.label
        );
        let len = self.code.len();
        for (pc, op) in self.code.iter().enumerate() {
            if let Some(target) = op.jump_target() {
                assert!(
                    target <= len,
                    "jump at {} in {:?} targets {} beyond end {}",
                    pc,
                    self.label,
                    target,
                    len
                );
            }
        }
        Rc::new(CompiledMethod {
            label: self.label,
            literals: self.literals,
            code: self.code,
            num_args: self.num_args,
            num_temps: self.num_temps,
            large_frame: self.large_frame,
            primitive: self.primitive,
            blocks: self.blocks,
            holder: Cell::new(None),
            stable: Assumption::new(),
        })
    }
}
