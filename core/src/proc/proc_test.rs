#[cfg(test)]
mod tests {
    use crate::proc::*;

    fn set(param: &str, value: &str) -> Instruction {
        Instruction::Set {
            node: 0,
            param: param.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_push_respects_capacity() {
        let mut proc = Procedure::new();
        for _ in 0..MAX_INSTRUCTIONS {
            proc.push(Instruction::NoOp { node: 0 }).expect("within bound");
        }
        assert_eq!(proc.len(), MAX_INSTRUCTIONS);

        let err = proc.push(Instruction::NoOp { node: 0 }).unwrap_err();
        assert_eq!(
            err,
            ProcError::CapacityExceeded {
                limit: MAX_INSTRUCTIONS,
                requested: MAX_INSTRUCTIONS + 1
            }
        );
        assert_eq!(proc.len(), MAX_INSTRUCTIONS);
    }

    #[test]
    fn test_from_instructions_rejects_oversized() {
        let too_many = vec![Instruction::NoOp { node: 0 }; MAX_INSTRUCTIONS + 3];
        assert!(Procedure::from_instructions(too_many).is_err());
    }

    #[test]
    fn test_clone_duplicates_parameter_names() {
        let original = Procedure::from_instructions(vec![set("x", "1")]).unwrap();
        let mut copy = original.clone();
        copy.clear();
        copy.push(set("y", "2")).unwrap();

        assert_eq!(original.instructions(), &[set("x", "1")]);
        assert_eq!(copy.instructions(), &[set("y", "2")]);
    }

    #[test]
    fn test_accessors_follow_variant() {
        let call = Instruction::Call { node: 7, slot: 12 };
        assert_eq!(call.node(), 7);
        assert_eq!(call.kind(), InstructionKind::Call);
        assert_eq!(call.call_target(), Some(12));

        let block = Instruction::Block {
            node: 3,
            cond: Condition::new("a", ComparisonOp::Ge, "b"),
        };
        assert_eq!(block.kind(), InstructionKind::Block);
        assert_eq!(block.call_target(), None);
        assert_eq!(block.to_string(), "block a >= b @3");
    }

    #[test]
    fn test_comparison_eval() {
        assert!(ComparisonOp::Eq.eval(2, 2));
        assert!(ComparisonOp::Ne.eval(2, 3));
        assert!(ComparisonOp::Lt.eval(-1, 0));
        assert!(!ComparisonOp::Gt.eval(0, 0));
        assert!(ComparisonOp::Le.eval(0, 0));
        assert!(ComparisonOp::Ge.eval(5, 4));
    }

    #[test]
    fn test_manifest_toml_shape() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            instructions: Procedure,
        }

        let src = r#"
            instructions = [
                { op = "set", param = "x", value = "4" },
                { op = "if_else", node = 2, cond = { lhs = "x", op = ">", rhs = "y" } },
                { op = "unary", unop = "++", param = "x", result = "x" },
                { op = "binary", binop = "<<", lhs = "x", rhs = "y", result = "z" },
                { op = "call", slot = 9 },
                { op = "no_op" },
            ]
        "#;
        let wrapper: Wrapper = toml::from_str(src).expect("manifest parses");
        let proc = wrapper.instructions;
        assert_eq!(proc.len(), 6);
        assert_eq!(proc.instructions()[0], set("x", "4"));
        assert_eq!(
            proc.instructions()[1],
            Instruction::IfElse {
                node: 2,
                cond: Condition::new("x", ComparisonOp::Gt, "y"),
            }
        );
        assert_eq!(
            proc.instructions()[3],
            Instruction::Binary {
                node: 0,
                op: BinaryOp::Shl,
                lhs: "x".into(),
                rhs: "y".into(),
                result: "z".into(),
            }
        );
        assert_eq!(proc.instructions()[4].call_target(), Some(9));
        assert!(proc.instructions()[5].is_noop());
    }
}
