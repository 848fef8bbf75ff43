//! Statement lowering. Every routine here takes the open block control has
//! reached and returns the block any following sibling must append to; no
//! block is ever written to after it has been handed a terminator.

use log::trace;

use crate::{
    ast::{AstTag, NodeId},
    lir::{BlockId, Instruction, Operand},
    CompileError,
};

use super::Lowering;

impl<'a> Lowering<'a> {
    /// Lowers a compound statement's children in order, threading the
    /// running block through, then closes the final block with a jump to
    /// `continuation` — the compound's single exit point.
    pub(crate) fn lower_code(
        &mut self,
        block: BlockId,
        node: NodeId,
        continuation: BlockId,
    ) -> Result<(), CompileError> {
        let mut block = block;

        let children: Vec<NodeId> = self.ast.children(node).collect();
        for child in children {
            block = self.lower_line(block, child)?;
        }

        self.unit.jump(block, continuation);
        Ok(())
    }

    /// Lowers a single statement into `block`, returning the continuation.
    pub(crate) fn lower_line(
        &mut self,
        block: BlockId,
        node: NodeId,
    ) -> Result<BlockId, CompileError> {
        let tag = self.ast[node].tag;
        trace!("{tag}");

        let continuation = match tag {
            AstTag::Branch => self.lower_branch(block, node)?,
            AstTag::Loop => self.lower_loop(block, node)?,
            AstTag::Iter => self.lower_iter(block, node)?,

            AstTag::Code => {
                let continuation = self.unit.create_block();
                self.lower_code(block, node, continuation)?;
                continuation
            }

            // Return, break and continue all leave the current path; each
            // hands back a fresh block so syntactically dead statements that
            // follow still have somewhere well-formed to go.
            AstTag::Return => {
                self.lower_return(block, node)?;
                self.unit.create_block()
            }
            AstTag::Break => {
                let target = self.break_to.ok_or_else(|| {
                    CompileError::Invariant("break with no enclosing loop".to_owned())
                })?;
                self.unit.jump(block, target);
                self.unit.create_block()
            }
            AstTag::Continue => {
                let target = self.continue_to.ok_or_else(|| {
                    CompileError::Invariant("continue with no enclosing loop".to_owned())
                })?;
                self.unit.jump(block, target);
                self.unit.create_block()
            }

            AstTag::Decl => {
                let mut block = block;
                self.lower_decl(&mut block, node)?;
                block
            }

            AstTag::Empty => block,

            tag if tag.is_value() => {
                let mut block = block;
                self.lower_discard(&mut block, node)?;
                block
            }

            tag => {
                return Err(CompileError::UnhandledTag {
                    position: "statement",
                    tag: tag.to_string(),
                })
            }
        };

        Ok(continuation)
    }

    /// If / if-else. The false arm is always present in the tree (an empty
    /// compound when the source had no `else`), so both arms funnel into the
    /// continuation symmetrically.
    fn lower_branch(&mut self, block: BlockId, node: NodeId) -> Result<BlockId, CompileError> {
        let continuation = self.unit.create_block();
        let if_true = self.unit.create_block();
        let if_false = self.unit.create_block();

        let condition = self.ast[node]
            .first_child
            .ok_or_else(|| CompileError::Invariant("branch without a condition".to_owned()))?;
        let true_arm = self.ast[node]
            .l
            .ok_or_else(|| CompileError::Invariant("branch without a true arm".to_owned()))?;
        let false_arm = self.ast[node]
            .r
            .ok_or_else(|| CompileError::Invariant("branch without a false arm".to_owned()))?;

        self.lower_branch_on_value(block, condition, if_true, if_false)?;

        self.lower_code(if_true, true_arm, continuation)?;
        self.lower_code(if_false, false_arm, continuation)?;

        Ok(continuation)
    }

    /// While / do-while. Which one is decided by shape: a do-while carries
    /// its body in `l`. The condition lowers twice — once inline in the
    /// incoming block for the entry test (skipped entirely for do-while),
    /// once in `loop_check` for the re-entrant test that `continue` lands on.
    fn lower_loop(&mut self, block: BlockId, node: NodeId) -> Result<BlockId, CompileError> {
        let continuation = self.unit.create_block();
        let body = self.unit.create_block();
        let loop_check = self.unit.create_block();

        let l = self.ast[node]
            .l
            .ok_or_else(|| CompileError::Invariant("loop without an l slot".to_owned()))?;
        let r = self.ast[node]
            .r
            .ok_or_else(|| CompileError::Invariant("loop without an r slot".to_owned()))?;

        let is_do = self.ast[l].tag == AstTag::Code;
        let (condition, code) = if is_do { (r, l) } else { (l, r) };

        if is_do {
            self.unit.jump(block, body);
        } else {
            self.lower_branch_on_value(block, condition, body, continuation)?;
        }

        let old_break_to = self.set_break_to(continuation);
        let old_continue_to = self.set_continue_to(loop_check);

        self.lower_code(body, code, loop_check)?;

        self.break_to = old_break_to;
        self.continue_to = old_continue_to;

        self.lower_branch_on_value(loop_check, condition, body, continuation)?;

        Ok(continuation)
    }

    /// C-style for: init and condition run in the incoming block, the step
    /// gets its own `iterate` block so `continue` can reach it.
    fn lower_iter(&mut self, block: BlockId, node: NodeId) -> Result<BlockId, CompileError> {
        let continuation = self.unit.create_block();
        let body = self.unit.create_block();
        let iterate = self.unit.create_block();

        let mut parts = self.ast.children(node);
        let (Some(init), Some(condition), Some(step)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CompileError::Invariant(
                "iter without init/condition/step".to_owned(),
            ));
        };
        let code = self.ast[node]
            .l
            .ok_or_else(|| CompileError::Invariant("iter without a body".to_owned()))?;

        let mut block = block;
        if self.ast[init].tag == AstTag::Decl {
            self.lower_decl(&mut block, init)?;
        } else {
            self.lower_discard(&mut block, init)?;
        }

        self.lower_branch_on_value(block, condition, body, continuation)?;

        let old_break_to = self.set_break_to(continuation);
        let old_continue_to = self.set_continue_to(iterate);

        self.lower_code(body, code, iterate)?;

        self.break_to = old_break_to;
        self.continue_to = old_continue_to;

        let mut iterate = iterate;
        self.lower_discard(&mut iterate, step)?;
        self.lower_branch_on_value(iterate, condition, body, continuation)?;

        Ok(continuation)
    }

    /// Return. Scalar results move into the return register; anything wider
    /// than a word copies into the caller's hidden destination buffer, whose
    /// address the caller pushed just past the saved frame pointer, and the
    /// return register carries that address back out.
    pub(crate) fn lower_return(
        &mut self,
        block: BlockId,
        node: NodeId,
    ) -> Result<(), CompileError> {
        let return_to = self
            .return_to
            .ok_or_else(|| CompileError::Invariant("return outside a function".to_owned()))?;

        if let Some(value) = self.ast[node].r {
            let mut block = block;

            let mut ret = self.lower_value(&mut block, value)?;
            let ret_size = self.value_width(value)?;
            let word = self.arch.word_size;
            let in_temp = ret_size > word;

            if in_temp {
                let scratch = self.regs.alloc()?;
                let scratch_ref = Operand::Reg {
                    reg: scratch,
                    width: word,
                };

                // Fetch the hidden destination pointer
                self.unit.push(
                    block,
                    Instruction::Move {
                        dest: scratch_ref,
                        src: Operand::Mem {
                            base: self.arch.frame_reg,
                            offset: (2 * word) as i64,
                            size: word,
                        },
                    },
                );
                // Copy the value into the caller's buffer
                self.unit.push(
                    block,
                    Instruction::Move {
                        dest: Operand::Mem {
                            base: scratch,
                            offset: 0,
                            size: ret_size,
                        },
                        src: ret,
                    },
                );
                self.free_operand(ret);

                // The caller gets its own pointer back
                ret = scratch_ref;
            }

            let width = if in_temp { word } else { ret_size };
            match self.regs.request(self.arch.ret_reg) {
                Some(reg) => {
                    self.unit.push(
                        block,
                        Instruction::Move {
                            dest: Operand::Reg { reg, width },
                            src: ret,
                        },
                    );
                    self.regs.free(reg);
                }
                // The only operand allowed to hold the return register is
                // the return value itself
                None if ret.is_reg(self.arch.ret_reg) => {}
                None => {
                    return Err(CompileError::Register(
                        "unable to allocate the return register".to_owned(),
                    ))
                }
            }

            self.free_operand(ret);
            self.unit.jump(block, return_to);
        } else {
            self.unit.jump(block, return_to);
        }

        Ok(())
    }
}
