// src/compiler/compiler.rs
//! Lowers pre-compiled clauses to WAM-style instructions
//!
//! A clause is split into chunks: the head and the goals up to and
//! including the first call form chunk 0, and every later call closes
//! another chunk. A variable that occurs in more than one chunk must
//! survive a call and is permanent (a `Y` slot in the environment);
//! every other variable is temporary (an `X` register).

use super::bytecode::{Constant, Instruction, Reg};
use crate::config::CompilerConfig;
use crate::parser::ast::{Functor, Term};
use crate::precompiler::builtins::{as_builtin_call, Builtin};
use crate::precompiler::PrecompiledClause;
use crate::{CompilationError, CompiledClause, CompiledQuery};
use ahash::{HashMap, HashSet};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
enum Goal<'a> {
    Cut,
    User(&'a Term),
    Builtin(Builtin, &'a Term),
}

impl<'a> Goal<'a> {
    fn classify(goal: &'a Term) -> Result<Goal<'a>, CompilationError> {
        if goal.is_atom("!") {
            return Ok(Goal::Cut);
        }
        if let Some((builtin, inner)) = as_builtin_call(goal) {
            return Ok(Goal::Builtin(builtin, inner));
        }
        if goal.is_callable() {
            Ok(Goal::User(goal))
        } else {
            Err(CompilationError::Internal(format!(
                "goal {} reached the instruction compiler",
                goal
            )))
        }
    }

    /// Calls may clobber every register, so they close a chunk
    fn ends_chunk(self) -> bool {
        match self {
            Goal::Cut => false,
            Goal::User(_) => true,
            Goal::Builtin(b, _) => b.calls_goals(),
        }
    }

    fn term(self) -> Option<&'a Term> {
        match self {
            Goal::Cut => None,
            Goal::User(t) | Goal::Builtin(_, t) => Some(t),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    count: usize,
    first_chunk: usize,
    last_chunk: usize,
    order: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Var(usize),
    CutLevel,
}

/// Variable classification for one clause
#[derive(Debug, Default)]
struct Layout {
    /// Chunk of each body goal
    chunks: Vec<usize>,
    /// Variable id to `Y` slot
    permanent: HashMap<usize, usize>,
    /// Last chunk of each `Y` slot, indexed by slot - 1
    last_use: Vec<usize>,
    singletons: HashSet<usize>,
    cut_level: Option<usize>,
}

impl Layout {
    fn analyse(head: Option<&Term>, goals: &[Goal<'_>], answers: &[usize]) -> Layout {
        let mut occurrences: HashMap<usize, Occurrence> = HashMap::default();
        let mut chunks = Vec::with_capacity(goals.len());
        let mut chunk = 0;
        let mut last_cut = None;

        if let Some(head) = head {
            count_variables(head, 0, &mut occurrences);
        }
        for goal in goals {
            chunks.push(chunk);
            match goal.term() {
                Some(term) => count_variables(term, chunk, &mut occurrences),
                None if chunk > 0 => last_cut = Some(chunk),
                None => {}
            }
            if goal.ends_chunk() {
                chunk += 1;
            }
        }
        // Answer variables outlive every goal of a query
        for id in answers {
            let order = occurrences.len();
            let entry = occurrences.entry(*id).or_insert(Occurrence {
                count: 0,
                first_chunk: chunk,
                last_chunk: chunk,
                order,
            });
            entry.count += 1;
            entry.last_chunk = chunk + 1;
        }

        let mut slots: Vec<(Slot, usize, usize)> = occurrences
            .iter()
            .filter(|(_, o)| o.first_chunk != o.last_chunk)
            .map(|(id, o)| (Slot::Var(*id), o.last_chunk, o.order))
            .collect();
        if let Some(last) = last_cut {
            slots.push((Slot::CutLevel, last, usize::MAX));
        }
        // Longest-lived first, so trimming drops slots from the end
        slots.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let mut layout = Layout {
            chunks,
            singletons: occurrences
                .iter()
                .filter(|(_, o)| o.count == 1 && o.first_chunk == o.last_chunk)
                .map(|(id, _)| *id)
                .collect(),
            ..Layout::default()
        };
        for (index, (slot, last, _)) in slots.into_iter().enumerate() {
            let y = index + 1;
            match slot {
                Slot::Var(id) => {
                    layout.permanent.insert(id, y);
                }
                Slot::CutLevel => layout.cut_level = Some(y),
            }
            layout.last_use.push(last);
        }
        layout
    }

    fn frame_size(&self) -> usize {
        self.last_use.len()
    }

    /// Permanent slots still needed after a call in `chunk`
    fn live_after(&self, chunk: usize) -> usize {
        self.last_use.iter().filter(|&&last| last > chunk).count()
    }
}

fn count_variables(term: &Term, chunk: usize, out: &mut HashMap<usize, Occurrence>) {
    match term {
        Term::Variable { id, .. } => {
            let order = out.len();
            let entry = out.entry(*id).or_insert(Occurrence {
                count: 0,
                first_chunk: chunk,
                last_chunk: chunk,
                order,
            });
            entry.count += 1;
            entry.last_chunk = entry.last_chunk.max(chunk);
        }
        Term::Compound { args, .. } => args.iter().for_each(|a| count_variables(a, chunk, out)),
        Term::ListCell(h, t) => {
            count_variables(h, chunk, out);
            count_variables(t, chunk, out);
        }
        _ => {}
    }
}

fn is_structure(term: &Term) -> bool {
    matches!(term, Term::Compound { .. } | Term::ListCell(..))
}

pub struct Compiler {
    instructions: Vec<Instruction>,
    layout: Layout,
    temps: HashMap<usize, usize>,
    next_temp: usize,
    seen: HashSet<usize>,
    /// Permanent variables first set up by `put_variable`
    unsafe_vars: HashSet<usize>,
}

impl Compiler {
    fn new(layout: Layout, max_arity: usize) -> Self {
        Self {
            instructions: Vec::new(),
            layout,
            temps: HashMap::default(),
            next_temp: max_arity + 1,
            seen: HashSet::default(),
            unsafe_vars: HashSet::default(),
        }
    }

    pub fn compile_clause(
        precompiled: &PrecompiledClause,
        config: &CompilerConfig,
    ) -> Result<CompiledClause, CompilationError> {
        let clause = &precompiled.clause;
        let head = clause
            .head
            .as_ref()
            .ok_or_else(|| CompilationError::Internal("program clause without head".into()))?;
        let functor = head
            .functor()
            .ok_or_else(|| CompilationError::Internal(format!("clause head {} has no functor", head)))?;
        let key = precompiled
            .key
            .ok_or_else(|| CompilationError::Internal(format!("no symbol key for {}", functor)))?;
        let goals = clause
            .body
            .iter()
            .map(Goal::classify)
            .collect::<Result<Vec<_>, _>>()?;

        let layout = Layout::analyse(Some(head), &goals, &[]);
        let mut compiler = Compiler::new(layout, max_arity(Some(head), &goals));

        // Built-ins that run goals (`\+`, `;`, `call/N`, ...) call out too
        let calls = goals.iter().filter(|g| g.ends_chunk()).count();
        let last_is_call = matches!(goals.last(), Some(Goal::User(_)));
        let needs_frame = compiler.layout.frame_size() > 0
            || calls > 1
            || (calls == 1 && !last_is_call)
            || (calls > 0 && !config.chain_rule);

        if needs_frame {
            compiler.emit(Instruction::Allocate(compiler.layout.frame_size()));
        }
        if let Some(y) = compiler.layout.cut_level {
            compiler.emit(Instruction::GetLevel(y));
        }
        compiler.compile_head(head);

        for (index, goal) in goals.iter().enumerate() {
            let chunk = compiler.layout.chunks[index];
            let last = index + 1 == goals.len();
            match *goal {
                Goal::User(term) if last => {
                    compiler.put_arguments(term, needs_frame);
                    if needs_frame {
                        compiler.emit(Instruction::Deallocate);
                    }
                    compiler.emit(Instruction::Execute(goal_functor(term)?));
                }
                _ => compiler.compile_goal(*goal, chunk)?,
            }
        }
        if !last_is_call {
            if needs_frame {
                compiler.emit(Instruction::Deallocate);
            }
            compiler.emit(Instruction::Proceed);
        }

        let references = references(precompiled);
        tracing::trace!(
            predicate = %functor,
            instructions = compiler.instructions.len(),
            permanent = compiler.layout.frame_size(),
            "clause compiled"
        );
        Ok(CompiledClause {
            functor,
            key,
            permanent_vars: compiler.layout.frame_size(),
            code: compiler.instructions,
            clause: clause.clone(),
            references,
        })
    }

    /// Queries keep their environment to the end so the answer
    /// variables can be read back.
    pub fn compile_query(
        precompiled: &PrecompiledClause,
        config: &CompilerConfig,
    ) -> Result<CompiledQuery, CompilationError> {
        let clause = &precompiled.clause;
        if clause.head.is_some() {
            return Err(CompilationError::Internal(format!(
                "query expected, found clause {}",
                clause
            )));
        }
        let goals = clause
            .body
            .iter()
            .map(Goal::classify)
            .collect::<Result<Vec<_>, _>>()?;
        let answers: Vec<usize> = precompiled
            .variable_names
            .iter()
            .filter_map(|(_, v)| match v {
                Term::Variable { id, .. } => Some(*id),
                _ => None,
            })
            .collect();

        let layout = Layout::analyse(None, &goals, &answers);
        let mut compiler = Compiler::new(layout, max_arity(None, &goals));
        let calls = goals.iter().any(|g| g.ends_chunk());
        if compiler.layout.frame_size() > 0 || calls {
            compiler.emit(Instruction::Allocate(compiler.layout.frame_size()));
        }
        if let Some(y) = compiler.layout.cut_level {
            compiler.emit(Instruction::GetLevel(y));
        }
        for (index, goal) in goals.iter().enumerate() {
            let chunk = compiler.layout.chunks[index];
            compiler.compile_goal(*goal, chunk)?;
        }
        compiler.emit(Instruction::Proceed);

        Ok(CompiledQuery {
            permanent_vars: compiler.layout.frame_size(),
            code: compiler.instructions,
            clause: clause.clone(),
            variable_names: precompiled.variable_names.clone(),
        })
    }

    /// Any goal other than a clause's final call
    fn compile_goal(&mut self, goal: Goal<'_>, chunk: usize) -> Result<(), CompilationError> {
        match goal {
            Goal::Cut if chunk == 0 => self.emit(Instruction::NeckCut),
            Goal::Cut => {
                let y = self.layout.cut_level.ok_or_else(|| {
                    CompilationError::Internal("cut after a call without a cut level".into())
                })?;
                self.emit(Instruction::Cut(y));
            }
            Goal::User(term) => {
                self.put_arguments(term, false);
                let live = self.layout.live_after(chunk);
                self.emit(Instruction::Call(goal_functor(term)?, live));
            }
            Goal::Builtin(builtin, term) => {
                self.put_arguments(term, false);
                let live = self.layout.live_after(chunk);
                self.emit(Instruction::CallBuiltin(builtin, live));
            }
        }
        Ok(())
    }

    fn compile_head(&mut self, head: &Term) {
        for (i, arg) in head.args().into_iter().enumerate() {
            let ai = i + 1;
            match arg {
                Term::Variable { id, .. } => {
                    if self.layout.singletons.contains(id) {
                        continue;
                    }
                    let (reg, first) = self.occurrence(*id);
                    self.emit(if first {
                        Instruction::GetVariable(reg, ai)
                    } else {
                        Instruction::GetValue(reg, ai)
                    });
                }
                t if t.is_nil() => self.emit(Instruction::GetNil(ai)),
                Term::ListCell(..) | Term::Compound { .. } => self.get_structure(arg, ai),
                other => {
                    if let Some(c) = Constant::from_term(other) {
                        self.emit(Instruction::GetConstant(c, ai));
                    }
                }
            }
        }
    }

    /// Match a structure in register `reg`, nested structures breadth-first
    fn get_structure(&mut self, term: &Term, reg: usize) {
        let mut queue: VecDeque<(&Term, usize)> = VecDeque::from([(term, reg)]);
        while let Some((term, reg)) = queue.pop_front() {
            match term.functor() {
                Some(f) if f.name == "." && f.arity == 2 => self.emit(Instruction::GetList(reg)),
                Some(f) => self.emit(Instruction::GetStructure(f, reg)),
                None => continue,
            }
            let mut voids = 0;
            for arg in term.args() {
                if self.is_singleton(arg) {
                    voids += 1;
                    continue;
                }
                if voids > 0 {
                    self.emit(Instruction::UnifyVoid(voids));
                    voids = 0;
                }
                match arg {
                    Term::Variable { id, .. } => {
                        let (reg, first) = self.occurrence(*id);
                        self.emit(if first {
                            Instruction::UnifyVariable(reg)
                        } else {
                            Instruction::UnifyValue(reg)
                        });
                    }
                    t if t.is_nil() => self.emit(Instruction::UnifyNil),
                    t if is_structure(t) => {
                        let x = self.fresh_temp();
                        self.emit(Instruction::UnifyVariable(Reg::X(x)));
                        queue.push_back((t, x));
                    }
                    other => {
                        if let Some(c) = Constant::from_term(other) {
                            self.emit(Instruction::UnifyConstant(c));
                        }
                    }
                }
            }
            if voids > 0 {
                self.emit(Instruction::UnifyVoid(voids));
            }
        }
    }

    /// Load a goal's arguments into `A1..An`
    fn put_arguments(&mut self, goal: &Term, last_call: bool) {
        for (i, arg) in goal.args().into_iter().enumerate() {
            let ai = i + 1;
            match arg {
                Term::Variable { id, .. } => {
                    if self.layout.singletons.contains(id) {
                        let x = self.fresh_temp();
                        self.emit(Instruction::PutVariable(Reg::X(x), ai));
                        continue;
                    }
                    let (reg, first) = self.occurrence(*id);
                    let instruction = match reg {
                        _ if first => {
                            if matches!(reg, Reg::Y(_)) {
                                self.unsafe_vars.insert(*id);
                            }
                            Instruction::PutVariable(reg, ai)
                        }
                        Reg::Y(y) if last_call && self.unsafe_vars.contains(id) => {
                            Instruction::PutUnsafeValue(y, ai)
                        }
                        _ => Instruction::PutValue(reg, ai),
                    };
                    self.emit(instruction);
                }
                t if t.is_nil() => self.emit(Instruction::PutNil(ai)),
                t if is_structure(t) => self.build(t, ai),
                other => {
                    if let Some(c) = Constant::from_term(other) {
                        self.emit(Instruction::PutConstant(c, ai));
                    }
                }
            }
        }
    }

    /// Build a structure into register `target`, innermost first
    fn build(&mut self, term: &Term, target: usize) {
        let args = term.args();
        let built: Vec<Option<usize>> = args
            .iter()
            .map(|arg| {
                is_structure(arg).then(|| {
                    let x = self.fresh_temp();
                    self.build(arg, x);
                    x
                })
            })
            .collect();

        match term.functor() {
            Some(f) if f.name == "." && f.arity == 2 => self.emit(Instruction::PutList(target)),
            Some(f) => self.emit(Instruction::PutStructure(f, target)),
            None => return,
        }

        let mut voids = 0;
        for (arg, built) in args.into_iter().zip(built) {
            if self.is_singleton(arg) {
                voids += 1;
                continue;
            }
            if voids > 0 {
                self.emit(Instruction::SetVoid(voids));
                voids = 0;
            }
            match (arg, built) {
                (_, Some(x)) => self.emit(Instruction::SetValue(Reg::X(x))),
                (Term::Variable { id, .. }, None) => {
                    let (reg, first) = self.occurrence(*id);
                    self.emit(if first {
                        Instruction::SetVariable(reg)
                    } else {
                        Instruction::SetValue(reg)
                    });
                }
                (t, None) if t.is_nil() => self.emit(Instruction::SetNil),
                (other, None) => {
                    if let Some(c) = Constant::from_term(other) {
                        self.emit(Instruction::SetConstant(c));
                    }
                }
            }
        }
        if voids > 0 {
            self.emit(Instruction::SetVoid(voids));
        }
    }

    /// Register of a variable and whether this is its first occurrence
    fn occurrence(&mut self, id: usize) -> (Reg, bool) {
        let first = self.seen.insert(id);
        if let Some(y) = self.layout.permanent.get(&id) {
            return (Reg::Y(*y), first);
        }
        if let Some(x) = self.temps.get(&id) {
            return (Reg::X(*x), first);
        }
        let x = self.fresh_temp();
        self.temps.insert(id, x);
        (Reg::X(x), first)
    }

    fn is_singleton(&self, term: &Term) -> bool {
        matches!(term, Term::Variable { id, .. } if self.layout.singletons.contains(id))
    }

    fn fresh_temp(&mut self) -> usize {
        let x = self.next_temp;
        self.next_temp += 1;
        x
    }

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }
}

fn goal_functor(term: &Term) -> Result<Functor, CompilationError> {
    term.functor()
        .ok_or_else(|| CompilationError::Internal(format!("goal {} has no functor", term)))
}

fn max_arity(head: Option<&Term>, goals: &[Goal<'_>]) -> usize {
    head.iter()
        .copied()
        .chain(goals.iter().filter_map(|g| g.term()))
        .map(Term::arity)
        .max()
        .unwrap_or(0)
}

/// User predicates a clause may call, including inside control constructs
fn references(precompiled: &PrecompiledClause) -> Vec<Functor> {
    let mut out: Vec<Functor> = Vec::new();
    for mark in &precompiled.marks {
        let f = &mark.functor;
        if Builtin::lookup(&f.name, f.arity).is_some() || (f.name == "!" && f.arity == 0) {
            continue;
        }
        if !out.contains(f) {
            out.push(f.clone());
        }
    }
    out
}

/// Joins the code of a predicate's clauses with choice instructions
pub struct Linker {
    instructions: Vec<Instruction>,
    label_counter: usize,
    labels: Vec<(usize, usize)>, // (label_id, instruction_index)
}

impl Linker {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            label_counter: 0,
            labels: Vec::new(),
        }
    }

    pub fn link<'c>(clauses: impl ExactSizeIterator<Item = &'c [Instruction]>) -> Vec<Instruction> {
        let count = clauses.len();
        let mut linker = Linker::new();
        let mut pending = None;
        for (index, code) in clauses.enumerate() {
            if let Some(label) = pending.take() {
                linker.place_label(label);
            }
            if count > 1 {
                if index + 1 < count {
                    let label = linker.new_label();
                    linker.emit(if index == 0 {
                        Instruction::TryMeElse(label)
                    } else {
                        Instruction::RetryMeElse(label)
                    });
                    pending = Some(label);
                } else {
                    linker.emit(Instruction::TrustMe);
                }
            }
            linker.instructions.extend_from_slice(code);
        }
        linker.resolve_labels()
    }

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn new_label(&mut self) -> usize {
        let label = self.label_counter;
        self.label_counter += 1;
        label
    }

    fn place_label(&mut self, label: usize) {
        let position = self.instructions.len();
        self.labels.push((label, position));
    }

    fn resolve_labels(mut self) -> Vec<Instruction> {
        for instruction in &mut self.instructions {
            if let Instruction::TryMeElse(label) | Instruction::RetryMeElse(label) = instruction {
                if let Some((_, pos)) = self.labels.iter().find(|(l, _)| l == label) {
                    *label = *pos;
                }
            }
        }
        self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::EventLog;
    use crate::parser::{parse_term, OperatorTable};
    use crate::precompiler::{CompilationContext, Input, Output};
    use std::sync::Arc;
    use Instruction::*;

    fn precompile(text: &str) -> PrecompiledClause {
        let mut ctx = CompilationContext::with_operators(
            Arc::new(OperatorTable::new()),
            CompilerConfig::default(),
        );
        let read = parse_term(text, &ctx.ops).unwrap();
        let mut log = EventLog::new();
        match ctx.precompile(Input::Term(read), &mut log).unwrap().remove(0) {
            Output::Clause(c) => c,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn code(text: &str) -> Vec<Instruction> {
        Compiler::compile_clause(&precompile(text), &CompilerConfig::default())
            .unwrap()
            .code
    }

    fn f(name: &str, arity: usize) -> Functor {
        Functor::new(name, arity)
    }

    #[test]
    fn test_variable_shared_across_calls_is_permanent() {
        let compiled =
            Compiler::compile_clause(&precompile("p(X) :- q(X), r(X)"), &CompilerConfig::default())
                .unwrap();
        assert_eq!(compiled.permanent_vars, 1);
        assert_eq!(
            compiled.code,
            vec![
                Allocate(1),
                GetVariable(Reg::Y(1), 1),
                PutValue(Reg::Y(1), 1),
                Call(f("q", 1), 1),
                PutValue(Reg::Y(1), 1),
                Deallocate,
                Execute(f("r", 1)),
            ]
        );
        assert_eq!(compiled.references, vec![f("q", 1), f("r", 1)]);
    }

    #[test]
    fn test_chain_rule_keeps_variable_temporary() {
        let compiled =
            Compiler::compile_clause(&precompile("p(X) :- q(X)"), &CompilerConfig::default())
                .unwrap();
        assert_eq!(compiled.permanent_vars, 0);
        assert_eq!(
            compiled.code,
            vec![
                GetVariable(Reg::X(2), 1),
                PutValue(Reg::X(2), 1),
                Execute(f("q", 1)),
            ]
        );

        let config = CompilerConfig {
            chain_rule: false,
            ..CompilerConfig::default()
        };
        let framed = Compiler::compile_clause(&precompile("p(X) :- q(X)"), &config).unwrap();
        assert_eq!(framed.code.first(), Some(&Allocate(0)));
        assert_eq!(&framed.code[framed.code.len() - 2..], &[Deallocate, Execute(f("q", 1))]);
    }

    #[test]
    fn test_append_clauses() {
        assert_eq!(
            code("append([], L, L)"),
            vec![
                GetNil(1),
                GetVariable(Reg::X(4), 2),
                GetValue(Reg::X(4), 3),
                Proceed
            ]
        );
        assert_eq!(
            code("append([H|T], L, [H|R]) :- append(T, L, R)"),
            vec![
                GetList(1),
                UnifyVariable(Reg::X(4)),
                UnifyVariable(Reg::X(5)),
                GetVariable(Reg::X(6), 2),
                GetList(3),
                UnifyValue(Reg::X(4)),
                UnifyVariable(Reg::X(7)),
                PutValue(Reg::X(5), 1),
                PutValue(Reg::X(6), 2),
                PutValue(Reg::X(7), 3),
                Execute(f("append", 3)),
            ]
        );
    }

    #[test]
    fn test_cut_placement() {
        assert_eq!(
            code("max(X, Y, X) :- X >= Y, !"),
            vec![
                GetVariable(Reg::X(4), 1),
                GetVariable(Reg::X(5), 2),
                GetValue(Reg::X(4), 3),
                PutValue(Reg::X(4), 1),
                PutValue(Reg::X(5), 2),
                CallBuiltin(Builtin::GreaterEq, 0),
                NeckCut,
                Proceed,
            ]
        );
        assert_eq!(
            code("p :- q, !, r"),
            vec![
                Allocate(1),
                GetLevel(1),
                Call(f("q", 0), 1),
                Cut(1),
                Deallocate,
                Execute(f("r", 0)),
            ]
        );
    }

    #[test]
    fn test_goal_calling_builtins_need_a_frame() {
        let negated = code("p :- \\+ a, b");
        assert_eq!(negated.first(), Some(&Allocate(0)));
        assert_eq!(&negated[negated.len() - 2..], &[Deallocate, Execute(f("b", 0))]);

        let disjunction = code("p :- (a ; b), q");
        assert_eq!(disjunction.first(), Some(&Allocate(0)));
        assert!(disjunction.iter().any(|i| matches!(i, CallBuiltin(Builtin::Disjunction, _))));
        assert_eq!(disjunction.last(), Some(&Execute(f("q", 0))));

        // A lone meta-call still returns through its own frame
        let alone = code("p :- \\+ a");
        assert_eq!(alone.first(), Some(&Allocate(0)));
        assert_eq!(&alone[alone.len() - 2..], &[Deallocate, Proceed]);
    }

    #[test]
    fn test_unsafe_value_and_trimming() {
        assert_eq!(
            code("p :- q(X), r(Y), s(X, Y)"),
            vec![
                Allocate(2),
                PutVariable(Reg::Y(1), 1),
                Call(f("q", 1), 2),
                PutVariable(Reg::Y(2), 1),
                Call(f("r", 1), 2),
                PutUnsafeValue(1, 1),
                PutUnsafeValue(2, 2),
                Deallocate,
                Execute(f("s", 2)),
            ]
        );
        assert_eq!(
            code("p :- q(X), r(Y), s(Y), t(X)"),
            vec![
                Allocate(2),
                PutVariable(Reg::Y(1), 1),
                Call(f("q", 1), 2),
                PutVariable(Reg::Y(2), 1),
                Call(f("r", 1), 2),
                PutValue(Reg::Y(2), 1),
                Call(f("s", 1), 1),
                PutUnsafeValue(1, 1),
                Deallocate,
                Execute(f("t", 1)),
            ]
        );
    }

    #[test]
    fn test_body_structures_build_bottom_up() {
        assert_eq!(
            code("p(X) :- q(f(g(X), _, a))"),
            vec![
                GetVariable(Reg::X(2), 1),
                PutStructure(f("g", 1), 3),
                SetValue(Reg::X(2)),
                PutStructure(f("f", 3), 1),
                SetValue(Reg::X(3)),
                SetVoid(1),
                SetConstant(Constant::Atom("a".into())),
                Execute(f("q", 1)),
            ]
        );
    }

    #[test]
    fn test_query_keeps_answer_variables() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let read = parse_term("append(X, Y, [1])", &ctx.ops).unwrap();
        let mut log = EventLog::new();
        let pc = ctx.precompile_query(read, &mut log).unwrap();
        let query = Compiler::compile_query(&pc, &CompilerConfig::default()).unwrap();
        assert_eq!(query.permanent_vars, 2);
        assert_eq!(
            query.code,
            vec![
                Allocate(2),
                PutVariable(Reg::Y(1), 1),
                PutVariable(Reg::Y(2), 2),
                PutList(3),
                SetConstant(Constant::Integer(1)),
                SetNil,
                Call(f("append", 3), 2),
                Proceed,
            ]
        );
    }

    #[test]
    fn test_linker_resolves_alternatives() {
        let a = vec![Proceed];
        let b = vec![GetNil(1), Proceed];
        let c = vec![Proceed];
        let code = Linker::link([a.as_slice(), b.as_slice(), c.as_slice()].into_iter());
        assert_eq!(
            code,
            vec![
                TryMeElse(2),
                Proceed,
                RetryMeElse(5),
                GetNil(1),
                Proceed,
                TrustMe,
                Proceed,
            ]
        );
        assert_eq!(Linker::link([a.as_slice()].into_iter()), vec![Proceed]);
    }
}
