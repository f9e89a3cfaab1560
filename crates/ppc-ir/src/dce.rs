//! Dead-code elimination: a single tail-to-head pass over the finalized IR
//! list for a basic block.
//!
//! The live-out mask is seeded with every architectural register
//! (temporaries excluded so they die at block end), flag bits are dropped
//! from `dflow_out` once they're not live, and a node survives only if
//! what's left of its `dflow_out` intersects the live set or the node is
//! `must_emit`.

use crate::node::IrNode;
use ppc_arch::DFlowSet;

/// Unlinks node `idx` from the sentinel-headed circular list in `nodes`.
/// The node itself is left in place (slab indices stay stable); only its
/// neighbors' `next`/`prev` are repointed.
fn unlink(nodes: &mut [IrNode], idx: u32) {
    let prev = nodes[idx as usize].prev;
    let next = nodes[idx as usize].next;
    nodes[prev as usize].next = next;
    nodes[next as usize].prev = prev;
}

/// Runs the dead-code pass over `nodes` (slab, index 0 is the sentinel).
pub(crate) fn run(nodes: &mut [IrNode]) {
    let removable = DFlowSet::removable_mask();
    let mut search = DFlowSet::default_search_mask();

    let mut idx = nodes[0].prev;
    while idx != 0 {
        let prev = nodes[idx as usize].prev;

        // Step 1: flag bits reconstructed by a later compare can be
        // dropped from dflow_out once they're not in the live set.
        let droppable = removable.difference(&search);
        let dflow_out = nodes[idx as usize].dflow_out.difference(&droppable);

        let keep = dflow_out.intersects(&search) || nodes[idx as usize].must_emit;

        if keep {
            nodes[idx as usize].dflow_out = dflow_out;
            let dflow_in = nodes[idx as usize].dflow_in;
            search = search.difference(&dflow_out).union(&dflow_in);
        } else {
            unlink(nodes, idx);
        }

        idx = prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{IrOp, OperandSize};
    use ppc_arch::{DFlowReg, registers::GPR};

    fn plain_node(dest: DFlowReg, src: DFlowReg) -> IrNode {
        let mut dflow_in = DFlowSet::EMPTY;
        dflow_in.set(src);
        let mut dflow_out = DFlowSet::EMPTY;
        dflow_out.set(dest);
        IrNode {
            op: IrOp::Move,
            dest: Some(dest),
            operands: [Some(crate::node::Operand::Reg(src)), None, None],
            cond: None,
            size: OperandSize::Int32,
            must_emit: false,
            dflow_in,
            dflow_out,
            next: 0,
            prev: 0,
        }
    }

    /// A chain `t0 := r3; r4 := t0` where `t0` is a scratch temporary: the
    /// first move is live (its output feeds the second), both survive
    /// because `r4` is architectural and live at block end.
    #[test]
    fn live_chain_survives() {
        let mut nodes = vec![IrNode::sentinel()];
        nodes.push(plain_node(DFlowReg::Temp(0), DFlowReg::Gpr(GPR::R3)));
        nodes.push(plain_node(DFlowReg::Gpr(GPR::R4), DFlowReg::Temp(0)));

        // wire the circular list: sentinel -> 1 -> 2 -> sentinel
        nodes[0].next = 1;
        nodes[1].prev = 0;
        nodes[1].next = 2;
        nodes[2].prev = 1;
        nodes[2].next = 0;
        nodes[0].prev = 2;

        run(&mut nodes);

        // both still linked: walk from sentinel.next
        let mut seen = vec![];
        let mut idx = nodes[0].next;
        while idx != 0 {
            seen.push(idx);
            idx = nodes[idx as usize].next;
        }
        assert_eq!(seen, vec![1, 2]);
    }

    /// A move into a scratch temporary that nothing ever reads is dead.
    #[test]
    fn dead_write_to_temp_is_removed() {
        let mut nodes = vec![IrNode::sentinel()];
        nodes.push(plain_node(DFlowReg::Temp(0), DFlowReg::Gpr(GPR::R3)));

        nodes[0].next = 1;
        nodes[1].prev = 0;
        nodes[1].next = 0;
        nodes[0].prev = 1;

        run(&mut nodes);

        assert_eq!(nodes[0].next, 0);
        assert_eq!(nodes[0].prev, 0);
    }
}
