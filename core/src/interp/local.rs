use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::{ExecStatus, InterpError, Interpreter, ParamTable};
use crate::analyze::{Callee, ProcAnalysis, ProcSummary};
use crate::config::InterpConfig;
use crate::proc::{BinaryOp, Condition, Instruction, Node, Procedure, UnaryOp};

/// Interpreter running against a [`ParamTable`] on the local scheduler.
pub struct LocalInterpreter {
    config: InterpConfig,
    params: Arc<dyn ParamTable>,
}

/// Pending effect of the last `IfElse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    None,
    /// Run the next instruction, then skip one.
    Then,
    /// Skip the next instruction.
    Else,
}

impl LocalInterpreter {
    pub fn new(config: InterpConfig, params: Arc<dyn ParamTable>) -> Self {
        Self { config, params }
    }

    pub fn config(&self) -> &InterpConfig {
        &self.config
    }

    pub fn params(&self) -> &Arc<dyn ParamTable> {
        &self.params
    }

    fn condition(&self, node: Node, cond: &Condition) -> Result<bool, InterpError> {
        let lhs = self.params.get(node, &cond.lhs)?;
        let rhs = self.params.get(node, &cond.rhs)?;
        Ok(cond.op.eval(lhs, rhs))
    }

    async fn block(&self, node: Node, cond: &Condition) -> Result<(), InterpError> {
        let timeout = Duration::from_millis(self.config.block_timeout_ms);
        let period = Duration::from_millis(self.config.block_period_ms);
        let started = Instant::now();
        loop {
            if self.condition(node, cond)? {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(InterpError::BlockTimeout {
                    cond: cond.to_string(),
                    waited_ms: self.config.block_timeout_ms,
                });
            }
            sleep(period.min(timeout - elapsed)).await;
        }
    }

    fn assign(&self, node: Node, param: &str, literal: &str) -> Result<(), InterpError> {
        let value = literal.trim().parse::<i64>().map_err(|_| InterpError::InvalidLiteral {
            param: param.to_string(),
            value: literal.to_string(),
        })?;
        self.params.set(node, param, value)?;
        Ok(())
    }

    fn unary(&self, node: Node, op: UnaryOp, param: &str, result: &str) -> Result<(), InterpError> {
        let source = match op {
            UnaryOp::Rmt => self.config.local_node,
            _ => node,
        };
        let value = self.params.get(source, param)?;
        let out = match op {
            UnaryOp::Inc => value.wrapping_add(1),
            UnaryOp::Dec => value.wrapping_sub(1),
            UnaryOp::Not => (value == 0) as i64,
            UnaryOp::Neg => value.wrapping_neg(),
            UnaryOp::Idt | UnaryOp::Rmt => value,
        };
        self.params.set(node, result, out)?;
        Ok(())
    }

    fn binary(&self, node: Node, op: BinaryOp, lhs: &str, rhs: &str, result: &str) -> Result<(), InterpError> {
        let a = self.params.get(node, lhs)?;
        let b = self.params.get(node, rhs)?;
        let out = match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                return Err(InterpError::DivideByZero {
                    result: result.to_string(),
                });
            }
            BinaryOp::Div => a.wrapping_div(b),
            BinaryOp::Mod => a.wrapping_rem(b),
            BinaryOp::Shl => a.wrapping_shl(shift_amount(b)?),
            BinaryOp::Shr => a.wrapping_shr(shift_amount(b)?),
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
        };
        self.params.set(node, result, out)?;
        Ok(())
    }

    /// Run one frame. Tail calls replace the frame in place; other DSL calls nest.
    fn run_frame<'a>(
        &'a self,
        proc: &'a Procedure,
        summary: &'a ProcSummary,
        analysis: &'a ProcAnalysis,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), InterpError>> {
        Box::pin(async move {
            if depth > self.config.max_recursion_depth {
                return Err(InterpError::RecursionLimit {
                    depth: self.config.max_recursion_depth,
                });
            }

            let mut proc = proc;
            let mut summary = summary;
            let mut pc = 0;
            let mut branch = Branch::None;

            while let Some(instruction) = proc.get(pc) {
                let index = pc;
                pc += 1;
                match branch {
                    Branch::Else => {
                        branch = Branch::None;
                        continue;
                    }
                    Branch::Then => branch = Branch::Else,
                    Branch::None => {}
                }

                match instruction {
                    Instruction::Block { node, cond } => self.block(*node, cond).await?,
                    Instruction::IfElse { node, cond } => {
                        branch = if self.condition(*node, cond)? {
                            Branch::Then
                        } else {
                            Branch::Else
                        };
                    }
                    Instruction::Set { node, param, value } => self.assign(*node, param, value)?,
                    Instruction::Unary {
                        node,
                        op,
                        param,
                        result,
                    } => self.unary(*node, *op, param, result)?,
                    Instruction::Binary {
                        node,
                        op,
                        lhs,
                        rhs,
                        result,
                    } => self.binary(*node, *op, lhs, rhs, result)?,
                    Instruction::Call { slot, .. } => match analysis.callee(*slot) {
                        None => return Err(InterpError::UnresolvedCall { slot: *slot }),
                        Some(Callee::Compiled(compiled)) => {
                            let status = compiled.call_blocking().await;
                            if status != 0 {
                                return Err(InterpError::CompiledFailed { slot: *slot, status });
                            }
                        }
                        Some(Callee::Dsl {
                            proc: callee,
                            summary: callee_summary,
                        }) => {
                            if summary.call_at(index).is_some_and(|site| site.tail) {
                                debug!(target: "procrt::interp", slot = *slot, "tail call");
                                proc = callee.as_ref();
                                summary = callee_summary.as_ref();
                                pc = 0;
                                branch = Branch::None;
                            } else {
                                self.run_frame(callee, callee_summary, analysis, depth + 1).await?;
                            }
                        }
                    },
                    Instruction::NoOp { .. } => {}
                }

                // Instruction boundary: lets an aborted execution stop here.
                tokio::task::yield_now().await;
            }
            Ok(())
        })
    }
}

fn shift_amount(raw: i64) -> Result<u32, InterpError> {
    if (0..64).contains(&raw) {
        Ok(raw as u32)
    } else {
        Err(InterpError::ShiftOutOfRange { amount: raw })
    }
}

impl Interpreter for LocalInterpreter {
    fn execute<'a>(&'a self, proc: &'a Procedure, analysis: &'a ProcAnalysis) -> BoxFuture<'a, ExecStatus> {
        Box::pin(async move {
            match self.run_frame(proc, analysis.root(), analysis, 0).await {
                Ok(()) => ExecStatus::OK,
                Err(err) => {
                    warn!(
                        target: "procrt::interp",
                        slot = analysis.root_slot(),
                        error = %err,
                        "procedure failed"
                    );
                    ExecStatus::from(&err)
                }
            }
        })
    }
}
