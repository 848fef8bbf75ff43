//! Expression lowering in its three modes: produce a value, produce only
//! side effects, or close the current block with a conditional branch.
//!
//! Value-mode lowering may split the current block — short-circuit operators
//! route through fresh blocks — so callers hand in the block id by mutable
//! reference and must keep appending to whatever it points at afterwards.

use crate::{
    ast::{AstTag, BinaryOp, Literal, NodeId, UnaryOp},
    lir::{BlockId, DataItem, Instruction, Operand},
    CompileError,
};

use super::Lowering;

impl<'a> Lowering<'a> {
    /// Lowers an expression for its value; the returned operand holds the
    /// result and stays live until released with `free_operand`.
    pub(crate) fn lower_value(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<Operand, CompileError> {
        match self.ast[node].tag {
            AstTag::Literal => {
                let width = self.value_width(node)?;
                let value = match self.ast[node].literal {
                    Some(Literal::Int(value)) => value,
                    Some(Literal::Char(value)) => value as i64,
                    Some(Literal::Bool(value)) => value as i64,
                    None => {
                        return Err(CompileError::Invariant(
                            "literal node without a value".to_owned(),
                        ))
                    }
                };
                Ok(Operand::Imm { value, width })
            }

            AstTag::Ident => {
                let symbol = self.ast[node].symbol.ok_or_else(|| {
                    CompileError::Invariant("identifier without a symbol".to_owned())
                })?;
                let size = self.value_width(node)?;
                Ok(Operand::Mem {
                    base: self.arch.frame_reg,
                    offset: self.syms[symbol].offset,
                    size,
                })
            }

            AstTag::Assign => {
                let target = self.ast[node]
                    .l
                    .ok_or_else(|| CompileError::Invariant("assign without a target".to_owned()))?;
                let value = self.ast[node]
                    .r
                    .ok_or_else(|| CompileError::Invariant("assign without a value".to_owned()))?;

                let dest = self.lower_value(block, target)?;
                let src = self.lower_value(block, value)?;

                self.unit.push(*block, Instruction::Move { dest, src });
                self.free_operand(src);

                Ok(dest)
            }

            AstTag::Binary => {
                let op = self.ast[node].binary_op.ok_or_else(|| {
                    CompileError::Invariant("binary node without an operator".to_owned())
                })?;

                if op.is_logical() {
                    return self.lower_logical_value(block, node);
                }

                let l = self.ast[node]
                    .l
                    .ok_or_else(|| CompileError::Invariant("binary without lhs".to_owned()))?;
                let r = self.ast[node]
                    .r
                    .ok_or_else(|| CompileError::Invariant("binary without rhs".to_owned()))?;

                let lhs = self.lower_value(block, l)?;
                let rhs = self.lower_value(block, r)?;

                let width = self.value_width(node)?;
                let dest = Operand::Reg {
                    reg: self.regs.alloc()?,
                    width,
                };

                self.unit
                    .push(*block, Instruction::Binary { op, dest, lhs, rhs });

                self.free_operand(lhs);
                self.free_operand(rhs);

                Ok(dest)
            }

            AstTag::Unary => {
                let op = self.ast[node].unary_op.ok_or_else(|| {
                    CompileError::Invariant("unary node without an operator".to_owned())
                })?;
                let operand = self.ast[node]
                    .r
                    .ok_or_else(|| CompileError::Invariant("unary without an operand".to_owned()))?;

                let src = self.lower_value(block, operand)?;
                let width = self.value_width(node)?;
                let dest = Operand::Reg {
                    reg: self.regs.alloc()?,
                    width,
                };

                match op {
                    // !x materializes as x == 0
                    UnaryOp::Not => self.unit.push(
                        *block,
                        Instruction::Binary {
                            op: BinaryOp::Eq,
                            dest,
                            lhs: src,
                            rhs: Operand::Imm {
                                value: 0,
                                width: src.width(),
                            },
                        },
                    ),
                    UnaryOp::Neg | UnaryOp::BitNot => {
                        self.unit.push(*block, Instruction::Unary { op, dest, src })
                    }
                }

                self.free_operand(src);
                Ok(dest)
            }

            AstTag::Call => self.lower_call(block, node),

            tag => Err(CompileError::UnhandledTag {
                position: "expression",
                tag: tag.to_string(),
            }),
        }
    }

    /// Lowers an expression for its side effects only.
    pub(crate) fn lower_discard(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<(), CompileError> {
        let value = self.lower_value(block, node)?;
        self.free_operand(value);
        Ok(())
    }

    /// Lowers a condition and closes `block` with a conditional branch to
    /// `if_true`/`if_false`. Short-circuit operators chain through
    /// intermediate test blocks instead of materializing a value.
    pub(crate) fn lower_branch_on_value(
        &mut self,
        block: BlockId,
        node: NodeId,
        if_true: BlockId,
        if_false: BlockId,
    ) -> Result<(), CompileError> {
        match (self.ast[node].tag, self.ast[node].binary_op) {
            (AstTag::Binary, Some(op @ (BinaryOp::And | BinaryOp::Or))) => {
                let l = self.ast[node]
                    .l
                    .ok_or_else(|| CompileError::Invariant("binary without lhs".to_owned()))?;
                let r = self.ast[node]
                    .r
                    .ok_or_else(|| CompileError::Invariant("binary without rhs".to_owned()))?;

                let test_rhs = self.unit.create_block();
                if op == BinaryOp::And {
                    self.lower_branch_on_value(block, l, test_rhs, if_false)?;
                } else {
                    self.lower_branch_on_value(block, l, if_true, test_rhs)?;
                }
                self.lower_branch_on_value(test_rhs, r, if_true, if_false)
            }
            (AstTag::Unary, _) if self.ast[node].unary_op == Some(UnaryOp::Not) => {
                let operand = self.ast[node]
                    .r
                    .ok_or_else(|| CompileError::Invariant("unary without an operand".to_owned()))?;
                self.lower_branch_on_value(block, operand, if_false, if_true)
            }
            _ => {
                let mut block = block;
                let condition = self.lower_value(&mut block, node)?;
                self.free_operand(condition);
                self.unit.branch(block, condition, if_true, if_false);
                Ok(())
            }
        }
    }

    /// `a && b` / `a || b` in value position: branch into two writer blocks
    /// that settle 1 or 0 into the result register, then continue from their
    /// join. The caller's block handle moves to the join block.
    fn lower_logical_value(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<Operand, CompileError> {
        let width = self.value_width(node)?;
        let dest = Operand::Reg {
            reg: self.regs.alloc()?,
            width,
        };

        let set_true = self.unit.create_block();
        let set_false = self.unit.create_block();
        let join = self.unit.create_block();

        self.lower_branch_on_value(*block, node, set_true, set_false)?;

        self.unit.push(
            set_true,
            Instruction::Move {
                dest,
                src: Operand::Imm { value: 1, width },
            },
        );
        self.unit.jump(set_true, join);

        self.unit.push(
            set_false,
            Instruction::Move {
                dest,
                src: Operand::Imm { value: 0, width },
            },
        );
        self.unit.jump(set_false, join);

        *block = join;
        Ok(dest)
    }

    /// Direct call: arguments pushed right to left, result handed back in
    /// the return register, caller rewinds the stack.
    fn lower_call(&mut self, block: &mut BlockId, node: NodeId) -> Result<Operand, CompileError> {
        let callee = self.ast[node]
            .l
            .ok_or_else(|| CompileError::Invariant("call without a callee".to_owned()))?;
        let symbol = self.ast[callee]
            .symbol
            .ok_or_else(|| CompileError::Invariant("callee without a symbol".to_owned()))?;

        self.arch.mangle_symbol(self.syms.get_mut(symbol));
        let label = self.syms[symbol].label.clone().unwrap();

        let word = self.arch.word_size;
        let args: Vec<NodeId> = self.ast.children(node).collect();
        let mut pushed = 0i64;

        for arg in args.into_iter().rev() {
            let value = self.lower_value(block, arg)?;
            self.unit.push(*block, Instruction::Push { src: value });
            self.free_operand(value);
            pushed += word as i64;
        }

        // The result register must be ours before control transfers
        let ret_reg = self.regs.request(self.arch.ret_reg).ok_or_else(|| {
            CompileError::Register("return register busy across a call".to_owned())
        })?;

        self.unit.push(*block, Instruction::Call { label });

        if pushed != 0 {
            self.unit
                .push(*block, Instruction::AdjustStack { bytes: pushed });
        }

        // The result leaves the return register straight away so a sibling
        // call in the same expression cannot clobber it
        let size = self.value_width(node)?;
        let scalar_width = if size == 0 || size > word { word } else { size };
        let home = self.regs.alloc()?;
        self.unit.push(
            *block,
            Instruction::Move {
                dest: Operand::Reg {
                    reg: home,
                    width: scalar_width,
                },
                src: Operand::Reg {
                    reg: ret_reg,
                    width: scalar_width,
                },
            },
        );
        self.regs.free(ret_reg);

        // Aggregate results come back as a pointer to the caller-allocated
        // buffer; the value of the expression is the buffer itself
        if size > word {
            Ok(Operand::Mem {
                base: home,
                offset: 0,
                size,
            })
        } else {
            Ok(Operand::Reg {
                reg: home,
                width: scalar_width,
            })
        }
    }

    /// Statement-position declaration: initializers lower as stores into the
    /// already-planned slots; bare declarators emit nothing.
    pub(crate) fn lower_decl(
        &mut self,
        block: &mut BlockId,
        node: NodeId,
    ) -> Result<(), CompileError> {
        let declarators: Vec<NodeId> = self.ast.children(node).collect();

        for declarator in declarators {
            match self.ast[declarator].tag {
                AstTag::Ident => {}
                AstTag::Assign => self.lower_discard(block, declarator)?,
                tag => {
                    return Err(CompileError::UnhandledTag {
                        position: "declaration",
                        tag: tag.to_string(),
                    })
                }
            }
        }

        Ok(())
    }

    /// Module-position declaration: every declarator becomes a data item,
    /// initialized when the frontend folded the initializer to a constant.
    pub(crate) fn lower_global_decl(&mut self, node: NodeId) -> Result<(), CompileError> {
        let declarators: Vec<NodeId> = self.ast.children(node).collect();

        for declarator in declarators {
            let (ident, init) = match self.ast[declarator].tag {
                AstTag::Ident => (declarator, None),
                AstTag::Assign => {
                    let ident = self.ast[declarator].l.ok_or_else(|| {
                        CompileError::Invariant("assign without a target".to_owned())
                    })?;
                    (ident, self.ast[declarator].r)
                }
                tag => {
                    return Err(CompileError::UnhandledTag {
                        position: "declaration",
                        tag: tag.to_string(),
                    })
                }
            };

            let symbol = self.ast[ident].symbol.ok_or_else(|| {
                CompileError::Invariant("global declarator without a symbol".to_owned())
            })?;
            self.arch.mangle_symbol(self.syms.get_mut(symbol));
            let label = self.syms[symbol].label.clone().unwrap();
            let size = self.value_width(ident)?;

            let init = match init {
                None => None,
                Some(value) => match self.ast[value].literal {
                    Some(Literal::Int(v)) => Some(v),
                    Some(Literal::Char(v)) => Some(v as i64),
                    Some(Literal::Bool(v)) => Some(v as i64),
                    None => {
                        return Err(CompileError::Invariant(
                            "global initializer is not a folded constant".to_owned(),
                        ))
                    }
                },
            };

            self.unit.add_data(DataItem { label, size, init });
        }

        Ok(())
    }

    /// Byte width of an expression, from the type the frontend attached.
    pub(crate) fn value_width(&self, node: NodeId) -> Result<usize, CompileError> {
        self.ast[node]
            .dt
            .as_ref()
            .map(|dt| dt.size(self.arch))
            .ok_or_else(|| CompileError::Invariant("expression without a type".to_owned()))
    }

    /// Releases any register an operand was holding. Frame-relative memory
    /// holds no scratch state; computed memory gives its base register back.
    pub(crate) fn free_operand(&mut self, operand: Operand) {
        match operand {
            Operand::Reg { reg, .. } => self.regs.free(reg),
            Operand::Mem { base, .. } if base != self.arch.frame_reg => self.regs.free(base),
            _ => {}
        }
    }
}
