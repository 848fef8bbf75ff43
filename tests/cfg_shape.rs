use std::collections::HashSet;

use sluice::ast::{Ast, BinaryOp, NodeId};
use sluice::lir::{BlockId, Instruction, IrUnit, Operand, Terminator};
use sluice::lower::lower_unit;
use sluice::sym::{SymTag, SymbolId, SymbolTable};
use sluice::target::{Architecture, MachineReg};
use sluice::ty::Type;

// ── Fixture helpers ──────────────────────────────────────────────────────

fn arch() -> &'static Architecture {
    sluice::target::lookup("x86_64").expect("x86_64 is always registered")
}

/// Declares `fn f() -> int` and lowers `body` as its implementation.
fn lower_fn(build: impl FnOnce(&mut Ast, &mut SymbolTable, SymbolId) -> NodeId) -> IrUnit {
    let mut syms = SymbolTable::new();
    let f = syms.add(
        SymTag::Scope,
        "f",
        Some(Type::function(Type::Int, vec![])),
    );

    let mut ast = Ast::new();
    let body = build(&mut ast, &mut syms, f);
    let f_impl = ast.fn_impl(f, body);
    let module = ast.module();
    ast.append_child(module, f_impl);

    lower_unit(&ast, module, &mut syms, arch()).expect("lowering should succeed")
}

/// Every block reachable from `entry` by following terminators.
fn reachable(unit: &IrUnit, entry: BlockId) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut queue = vec![entry];
    while let Some(block) = queue.pop() {
        if seen.insert(block) {
            queue.extend(unit.successors(block));
        }
    }
    seen
}

fn jump_target(unit: &IrUnit, block: BlockId) -> BlockId {
    match unit.blocks[block].terminator {
        Some(Terminator::Jump { destination }) => destination,
        other => panic!("expected a jump, found {other:?}"),
    }
}

fn branch_targets(unit: &IrUnit, block: BlockId) -> (BlockId, BlockId) {
    match unit.blocks[block].terminator {
        Some(Terminator::Branch {
            if_true, if_false, ..
        }) => (if_true, if_false),
        other => panic!("expected a branch, found {other:?}"),
    }
}

fn moves_into_ret_reg(unit: &IrUnit, block: BlockId) -> bool {
    unit.blocks[block].instructions.iter().any(|instruction| {
        matches!(
            instruction,
            Instruction::Move {
                dest: Operand::Reg {
                    reg: MachineReg::Rax,
                    ..
                },
                ..
            }
        )
    })
}

// ── Round-trip scenarios ─────────────────────────────────────────────────

#[test]
fn empty_function_is_entry_straight_to_epilogue() {
    let unit = lower_fn(|ast, _, _| ast.code([]));

    let function = &unit.functions[0];
    assert_eq!(unit.blocks.len(), 2);
    assert_eq!(jump_target(&unit, function.entry), function.epilogue);
    assert!(matches!(
        unit.blocks[function.entry].instructions[0],
        Instruction::Prologue { frame_size: 0, .. }
    ));
    assert_eq!(
        unit.blocks[function.epilogue].terminator,
        Some(Terminator::Ret)
    );
}

#[test]
fn if_else_with_returns_on_both_arms() {
    let unit = lower_fn(|ast, _, _| {
        let c = ast.int_lit(1);
        let one = ast.int_lit(1);
        let two = ast.int_lit(2);
        let ret_one = ast.ret(Some(one));
        let ret_two = ast.ret(Some(two));
        let then_arm = ast.code([ret_one]);
        let else_arm = ast.code([ret_two]);
        let branch = ast.branch(c, then_arm, else_arm);
        ast.code([branch])
    });

    let function = &unit.functions[0];
    let (if_true, if_false) = branch_targets(&unit, function.entry);

    assert!(moves_into_ret_reg(&unit, if_true));
    assert!(moves_into_ret_reg(&unit, if_false));
    assert_eq!(jump_target(&unit, if_true), function.epilogue);
    assert_eq!(jump_target(&unit, if_false), function.epilogue);

    // The continuation after the if exists but nothing live leads into it
    let live = reachable(&unit, function.entry);
    assert_eq!(
        live,
        HashSet::from([function.entry, if_true, if_false, function.epilogue])
    );
    assert!(unit.blocks.len() > live.len());

    // Every reachable block carries exactly one terminator
    for block in &live {
        assert!(unit.blocks[*block].terminator.is_some());
    }
}

#[test]
fn while_loop_with_break() {
    // while (c) { if (d) break; }
    let unit = lower_fn(|ast, _, _| {
        let c = ast.int_lit(1);
        let d = ast.int_lit(1);
        let brk = ast.brk();
        let break_arm = ast.code([brk]);
        let else_arm = ast.code([]);
        let branch = ast.branch(d, break_arm, else_arm);
        let body = ast.code([branch]);
        let while_loop = ast.while_loop(c, body);
        ast.code([while_loop])
    });

    let function = &unit.functions[0];

    // Entry tests the condition straight into body or loop exit
    let (body, cont) = branch_targets(&unit, function.entry);

    // The body opens with the inner if
    let (break_arm, else_arm) = branch_targets(&unit, body);

    // break jumps directly to the loop exit
    assert_eq!(jump_target(&unit, break_arm), cont);

    // The else arm falls through the if continuation into the re-test, and
    // the re-test branches back to the body or out
    let if_cont = jump_target(&unit, else_arm);
    let loop_check = jump_target(&unit, if_cont);
    assert_eq!(branch_targets(&unit, loop_check), (body, cont));

    // The loop exit continues into the function epilogue
    assert_eq!(jump_target(&unit, cont), function.epilogue);
}

#[test]
fn do_while_runs_body_before_first_test() {
    // do { x = 1; } while (c);
    let unit = lower_fn(|ast, syms, f| {
        let x = syms.declare(f, SymTag::Id, "x", Some(Type::Int));
        let x_ref = ast.ident(x, Type::Int);
        let one = ast.int_lit(1);
        let store = ast.assign(x_ref, one, Type::Int);
        let body = ast.code([store]);
        let c = ast.int_lit(0);
        let do_while = ast.do_while_loop(body, c);
        ast.code([do_while])
    });

    let function = &unit.functions[0];

    // No entry test: straight jump into the body
    let body = jump_target(&unit, function.entry);
    assert!(unit.blocks[body]
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::Move { .. })));

    // Body flows into the re-test, which branches back or out
    let loop_check = jump_target(&unit, body);
    let (loop_body, cont) = branch_targets(&unit, loop_check);
    assert_eq!(loop_body, body);
    assert_eq!(jump_target(&unit, cont), function.epilogue);
}

#[test]
fn for_loop_shape() {
    // for (i = 0; i < 10; i = i + 1) { }
    let unit = lower_fn(|ast, syms, f| {
        let i = syms.declare(f, SymTag::Id, "i", Some(Type::Int));

        let i_init = ast.ident(i, Type::Int);
        let zero = ast.int_lit(0);
        let init_assign = ast.assign(i_init, zero, Type::Int);
        let init = ast.decl([init_assign]);

        let i_cond = ast.ident(i, Type::Int);
        let ten = ast.int_lit(10);
        let cond = ast.binary(BinaryOp::Lt, i_cond, ten, Type::Int);

        let i_step_l = ast.ident(i, Type::Int);
        let i_step_r = ast.ident(i, Type::Int);
        let one = ast.int_lit(1);
        let add = ast.binary(BinaryOp::Add, i_step_r, one, Type::Int);
        let step = ast.assign(i_step_l, add, Type::Int);

        let body = ast.code([]);
        let for_loop = ast.iter_loop(init, cond, step, body);
        ast.code([for_loop])
    });

    let function = &unit.functions[0];

    // Entry holds the init store and the first condition test
    assert!(unit.blocks[function.entry]
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::Move { .. })));
    let (body, cont) = branch_targets(&unit, function.entry);

    // Empty body jumps to the iterate block, which steps then re-tests
    let iterate = jump_target(&unit, body);
    assert!(unit.blocks[iterate]
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::Binary { op: BinaryOp::Add, .. })));
    assert_eq!(branch_targets(&unit, iterate), (body, cont));
}

#[test]
fn break_and_continue_target_the_innermost_loop() {
    // while (a) { while (b) { continue; } break; }
    let unit = lower_fn(|ast, _, _| {
        let a = ast.int_lit(1);
        let b = ast.int_lit(1);
        let cont_stmt = ast.cont();
        let inner_body = ast.code([cont_stmt]);
        let inner = ast.while_loop(b, inner_body);
        let brk = ast.brk();
        let outer_body = ast.code([inner, brk]);
        let outer = ast.while_loop(a, outer_body);
        ast.code([outer])
    });

    let function = &unit.functions[0];

    let (outer_body, outer_cont) = branch_targets(&unit, function.entry);
    let (inner_body, inner_cont) = branch_targets(&unit, outer_body);

    // continue inside the inner loop jumps to the *inner* re-test
    let inner_continue_target = jump_target(&unit, inner_body);
    assert_eq!(branch_targets(&unit, inner_continue_target), (inner_body, inner_cont));

    // break after the inner loop jumps to the *outer* exit, proving the
    // loop targets were restored when the inner loop finished
    assert_eq!(jump_target(&unit, inner_cont), outer_cont);
    assert_eq!(jump_target(&unit, outer_cont), function.epilogue);
}

#[test]
fn statements_after_return_land_in_an_unreachable_block() {
    let unit = lower_fn(|ast, syms, f| {
        let x = syms.declare(f, SymTag::Id, "x", Some(Type::Int));
        let value = ast.int_lit(3);
        let ret = ast.ret(Some(value));
        let x_ref = ast.ident(x, Type::Int);
        let nine = ast.int_lit(9);
        let dead_store = ast.assign(x_ref, nine, Type::Int);
        ast.code([ret, dead_store])
    });

    let function = &unit.functions[0];
    let live = reachable(&unit, function.entry);

    // The dead store was lowered somewhere, but nowhere reachable
    let dead_blocks: Vec<_> = unit
        .blocks
        .indices()
        .filter(|id| !live.contains(id))
        .collect();
    assert!(!dead_blocks.is_empty());
    assert!(dead_blocks.iter().any(|id| unit.blocks[*id]
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::Move { .. }))));
}

#[test]
fn short_circuit_condition_splits_blocks() {
    // if (a && b) { } else { }
    let unit = lower_fn(|ast, _, _| {
        let a = ast.int_lit(1);
        let b = ast.int_lit(0);
        let cond = ast.binary(BinaryOp::And, a, b, Type::Int);
        let then_arm = ast.code([]);
        let else_arm = ast.code([]);
        let branch = ast.branch(cond, then_arm, else_arm);
        ast.code([branch])
    });

    let function = &unit.functions[0];

    // Entry tests `a`: false goes straight to the else arm, true moves on
    // to a second test block for `b`
    let (test_rhs, if_false_a) = branch_targets(&unit, function.entry);
    let (if_true, if_false_b) = branch_targets(&unit, test_rhs);
    assert_eq!(if_false_a, if_false_b);
    assert_ne!(if_true, test_rhs);
}
