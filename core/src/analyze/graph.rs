use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::{AnalysisSession, AnalyzeError, Analyzer, Callee, ProcAnalysis, ProcSummary};
use crate::proc::Procedure;
use crate::slot::Slot;
use crate::store::{Lookup, ProcStore};

/// Analyzer that resolves callees from a shared [`ProcStore`].
#[derive(Debug, Clone)]
pub struct CallGraphAnalyzer {
    store: Arc<ProcStore>,
}

impl CallGraphAnalyzer {
    pub fn new(store: Arc<ProcStore>) -> Self {
        Self { store }
    }

    /// Pull every procedure reachable from `root` into the session.
    fn load(&self, root: Slot, session: &mut AnalysisSession) -> Result<(), AnalyzeError> {
        let mut pending = vec![root];
        while let Some(caller) = pending.pop() {
            let targets: Vec<Slot> = match session.get(caller) {
                Some(Callee::Dsl { summary, .. }) => summary.calls.iter().map(|site| site.slot).collect(),
                _ => continue,
            };

            for slot in targets {
                if session.contains(slot) {
                    continue;
                }
                let callee = match self.store.get(slot)? {
                    Lookup::Compiled(proc) => Callee::Compiled(proc),
                    Lookup::Dsl(proc) => {
                        pending.push(slot);
                        Callee::Dsl {
                            summary: Arc::new(ProcSummary::of(&proc)),
                            proc: Arc::new(proc),
                        }
                    }
                    Lookup::Empty => return Err(AnalyzeError::MissingCallee { caller, slot }),
                };
                session.insert(slot, callee);
            }
        }
        Ok(())
    }
}

impl Analyzer for CallGraphAnalyzer {
    fn analyze(
        &self,
        root_slot: Slot,
        proc: Arc<Procedure>,
        session: &mut AnalysisSession,
    ) -> Result<ProcAnalysis, AnalyzeError> {
        let root = Arc::new(ProcSummary::of(&proc));
        // Self-calls resolve to the detached root, not whatever the store holds now.
        session.insert(
            root_slot,
            Callee::Dsl {
                proc,
                summary: Arc::clone(&root),
            },
        );

        self.load(root_slot, session)?;
        check_recursion(root_slot, session)?;

        debug!(
            target: "procrt::analyze",
            slot = root_slot,
            reachable = session.len(),
            "procedure analyzed"
        );

        Ok(ProcAnalysis {
            root_slot,
            root,
            callees: session.entries.clone(),
        })
    }
}

fn dsl_edges(session: &AnalysisSession, slot: Slot) -> impl Iterator<Item = (Slot, bool)> + '_ {
    let calls = match session.get(slot) {
        Some(Callee::Dsl { summary, .. }) => summary.calls.as_slice(),
        _ => &[],
    };
    calls
        .iter()
        .filter(|site| matches!(session.get(site.slot), Some(Callee::Dsl { .. })))
        .map(|site| (site.slot, site.tail))
}

/// Reject any non-tail call whose endpoints share a strongly connected component.
///
/// Tail-call-only cycles run in constant depth and are accepted.
fn check_recursion(root: Slot, session: &AnalysisSession) -> Result<(), AnalyzeError> {
    let mut tarjan = Tarjan::new(session);
    tarjan.visit(root);
    let component = tarjan.component;

    let mut nodes: Vec<Slot> = component.keys().copied().collect();
    nodes.sort_unstable();
    for caller in nodes {
        for (target, tail) in dsl_edges(session, caller) {
            if !tail && component.get(&target) == component.get(&caller) {
                let mut cycle = vec![caller];
                cycle.extend(path_within(session, &component, target, caller));
                return Err(AnalyzeError::UnsafeRecursion { cycle });
            }
        }
    }
    Ok(())
}

/// Shortest call path `from ..= to` inside one component.
fn path_within(session: &AnalysisSession, component: &FxHashMap<Slot, usize>, from: Slot, to: Slot) -> Vec<Slot> {
    let scc = component.get(&from).copied();
    let mut parent: FxHashMap<Slot, Slot> = FxHashMap::default();
    let mut seen: FxHashSet<Slot> = FxHashSet::default();
    let mut queue = VecDeque::from([from]);
    seen.insert(from);

    while let Some(slot) = queue.pop_front() {
        if slot == to {
            break;
        }
        for (next, _) in dsl_edges(session, slot) {
            if component.get(&next).copied() == scc && seen.insert(next) {
                parent.insert(next, slot);
                queue.push_back(next);
            }
        }
    }

    let mut path = vec![to];
    let mut cursor = to;
    while cursor != from {
        match parent.get(&cursor) {
            Some(prev) => {
                cursor = *prev;
                path.push(cursor);
            }
            None => break,
        }
    }
    path.reverse();
    path
}

struct Tarjan<'a> {
    session: &'a AnalysisSession,
    next_index: usize,
    index: FxHashMap<Slot, usize>,
    low: FxHashMap<Slot, usize>,
    stack: Vec<Slot>,
    on_stack: FxHashSet<Slot>,
    component: FxHashMap<Slot, usize>,
    next_component: usize,
}

impl<'a> Tarjan<'a> {
    fn new(session: &'a AnalysisSession) -> Self {
        Self {
            session,
            next_index: 0,
            index: FxHashMap::default(),
            low: FxHashMap::default(),
            stack: Vec::new(),
            on_stack: FxHashSet::default(),
            component: FxHashMap::default(),
            next_component: 0,
        }
    }

    // Recursion depth is bounded by the slot space.
    fn visit(&mut self, slot: Slot) {
        self.index.insert(slot, self.next_index);
        self.low.insert(slot, self.next_index);
        self.next_index += 1;
        self.stack.push(slot);
        self.on_stack.insert(slot);

        let edges: Vec<(Slot, bool)> = dsl_edges(self.session, slot).collect();
        for (next, _) in edges {
            if !self.index.contains_key(&next) {
                self.visit(next);
                let low = self.low[&slot].min(self.low[&next]);
                self.low.insert(slot, low);
            } else if self.on_stack.contains(&next) {
                let low = self.low[&slot].min(self.index[&next]);
                self.low.insert(slot, low);
            }
        }

        if self.low[&slot] == self.index[&slot] {
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                self.component.insert(member, self.next_component);
                if member == slot {
                    break;
                }
            }
            self.next_component += 1;
        }
    }
}
