//! Bytecode opcodes for the object runtime.
//!
//! Defines all instructions the engine executes. The numbering of any
//! particular historical bytecode set is deliberately not reproduced;
//! instructions are an enum with explicit operands and the program counter is
//! an instruction index.

/// Bytecode instructions.
///
/// Jump targets are absolute instruction indices. A jump whose target is at
/// or before the jump itself is a backward jump and doubles as an interrupt
/// safe point.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    // Pushes
    /// Push the active receiver
    PushReceiver,
    /// Push the receiver's instance variable at the given slot index
    PushReceiverVariable(u16),
    /// Push a frame slot (argument, copied value or temporary)
    PushTemp(u16),
    /// Push a literal from the literal pool
    PushLiteral(u16),
    /// Push nil
    PushNil,
    /// Push true
    PushTrue,
    /// Push false
    PushFalse,
    /// Push an inline small-integer constant
    PushSmallInt(i64),
    /// Push the active activation as a context object, reifying it
    PushContext,
    /// Push a closure over the block descriptor at the given index; the
    /// block's body follows this instruction and is skipped by fall-through
    PushClosure {
        /// Index into the method's block descriptor table
        block: u16,
    },
    /// Push a fresh array of the given size with every slot unset
    /// (used for remote-temp vectors)
    PushNewArray {
        /// Element count
        size: u8,
    },
    /// Pop the top `size` values into a fresh array and push it
    PushConsArray {
        /// Element count
        size: u8,
    },
    /// Push an element of a remote-temp vector: `vector` names the frame
    /// slot holding the array, `index` the element within it
    PushRemoteTemp {
        /// Element index within the vector
        index: u8,
        /// Frame slot holding the vector
        vector: u8,
    },

    // Stores (non-popping) and pop-intos
    /// Store the top of stack into an instance variable, keeping it pushed
    StoreReceiverVariable(u16),
    /// Store the top of stack into a frame slot, keeping it pushed
    StoreTemp(u16),
    /// Store the top of stack into a remote-temp vector, keeping it pushed
    StoreRemoteTemp {
        /// Element index within the vector
        index: u8,
        /// Frame slot holding the vector
        vector: u8,
    },
    /// Pop the top of stack into an instance variable
    PopIntoReceiverVariable(u16),
    /// Pop the top of stack into a frame slot
    PopIntoTemp(u16),
    /// Pop the top of stack into a remote-temp vector
    PopIntoRemoteTemp {
        /// Element index within the vector
        index: u8,
        /// Frame slot holding the vector
        vector: u8,
    },

    // Stack shuffling
    /// Duplicate the top of stack
    Dup,
    /// Discard the top of stack
    Pop,

    // Jumps
    /// Unconditional jump
    Jump(u32),
    /// Pop a boolean; jump when true. Non-booleans send `mustBeBoolean`.
    JumpIfTrue(u32),
    /// Pop a boolean; jump when false. Non-booleans send `mustBeBoolean`.
    JumpIfFalse(u32),

    // Sends
    /// Send the selector at the given literal index to the receiver below
    /// the arguments
    Send {
        /// Literal index of the selector
        selector: u16,
        /// Argument count
        num_args: u8,
    },
    /// Send starting the lookup above the holder of the current method
    SendSuper {
        /// Literal index of the selector
        selector: u16,
        /// Argument count
        num_args: u8,
    },

    // Returns
    /// Return the top of stack. From a method activation this is a local
    /// return; from a block activation it is a non-local return to the
    /// block's home method.
    ReturnTop,
    /// Return the receiver (local/non-local as for [`Opcode::ReturnTop`])
    ReturnReceiver,
    /// Return the top of stack from the current block activation itself
    BlockReturn,
}

impl Opcode {
    /// Whether this instruction is a message send.
    pub fn is_send(&self) -> bool {
        matches!(self, Opcode::Send { .. } | Opcode::SendSuper { .. })
    }

    /// The jump target, when this is any jump instruction.
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Opcode::Jump(t) | Opcode::JumpIfTrue(t) | Opcode::JumpIfFalse(t) => {
                Some(*t as usize)
            }
            _ => None,
        }
    }
}
