//! Execution engine for the script runtime.
//!
//! The [`Runtime`] owns three doubly-ended job queues (run, blocked, wait)
//! and pumps the head of the run queue for a bounded number of evaluation
//! steps per heartbeat tick. The heartbeat is an ordinary reactor timer that
//! the runtime re-arms while runnable jobs remain, so the reactor regains
//! control between slices and fd/timer/signal dispatch never starves.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::Stm;
use crate::event::{now_us, Reactor};
use crate::interpreter::channel::{Channel, ChannelHandler};
use crate::interpreter::constants::{DEFAULT_STEP, MAX_OPENFILE};
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::scope::{ScopeChain, Symbol};
use crate::interpreter::stack::{NodeForm, StackNode, StepFlow, StepResult};
use crate::memory::func::{FuncDetail, InternalFn};
use crate::memory::value::Value;
use crate::memory::var::{RetExpr, VarRef, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Blocked,
    Waiting,
    Done,
    Failed,
}

/// Open-file tracking bounded by the per-job budget.
#[derive(Debug)]
pub struct FileSet {
    fds: Vec<RawFd>,
    limit: usize,
}

impl FileSet {
    fn new(limit: usize) -> FileSet {
        FileSet { fds: Vec::new(), limit }
    }

    pub fn track(&mut self, fd: RawFd) -> Result<(), RuntimeError> {
        if self.fds.len() >= self.limit {
            return Err(RuntimeError::OpenFileLimit { limit: self.limit });
        }
        self.fds.push(fd);
        Ok(())
    }

    pub fn untrack(&mut self, fd: RawFd) -> bool {
        match self.fds.iter().position(|&f| f == fd) {
            Some(i) => {
                self.fds.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.fds.len()
    }
}

/// One scripted execution context: AST, scope chain, evaluation stack and
/// the queue bookkeeping around them.
pub struct Job {
    name: Rc<str>,
    pub(crate) stack: Vec<StackNode>,
    pub(crate) scopes: ScopeChain,
    /// The current return-expression: a child activation's result on its
    /// way to the parent.
    pub(crate) ret: Option<RetExpr>,
    result: Option<RetExpr>,
    error: Option<String>,
    state: JobState,
    /// Channel name this job is blocked on, if any.
    pub(crate) blocked_on: Option<Rc<str>>,
    channels: FxHashMap<Rc<str>, Channel>,
    files: FileSet,
    data: Option<Box<dyn Any>>,
    step_budget: u32,
}

impl Job {
    fn new(stm: Rc<Stm>, name: &str) -> Job {
        let name: Rc<str> = Rc::from(name);
        let mut stack = Vec::new();
        stack.push(StackNode::new(NodeForm::Stm(stm)));
        Job {
            name: Rc::clone(&name),
            stack,
            scopes: ScopeChain::new(name),
            ret: None,
            result: None,
            error: None,
            state: JobState::Ready,
            blocked_on: None,
            channels: FxHashMap::default(),
            files: FileSet::new(MAX_OPENFILE),
            data: None,
            step_budget: DEFAULT_STEP,
        }
    }

    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The job's final value once it has finished.
    pub fn result(&self) -> Option<Value> {
        self.result.as_ref().and_then(RetExpr::value)
    }

    /// Record a formatted error message on the job.
    pub fn set_error(&mut self, msg: &str) {
        self.error = Some(format!("job '{}': {}", self.name, msg));
    }

    pub fn set_step_budget(&mut self, step: u32) {
        self.step_budget = step.max(1);
    }

    pub fn files(&mut self) -> &mut FileSet {
        &mut self.files
    }

    pub fn set_data(&mut self, data: Box<dyn Any>) {
        self.data = Some(data);
    }

    pub fn data_mut(&mut self) -> Option<&mut Box<dyn Any>> {
        self.data.as_mut()
    }

    pub(crate) fn take_ret(&mut self) -> RetExpr {
        self.ret.take().unwrap_or_else(RetExpr::nil)
    }

    pub fn channel_new(&mut self, name: &str) {
        self.channels.entry(Rc::from(name)).or_insert_with(Channel::new);
    }

    pub fn channel_free(&mut self, name: &str) -> bool {
        self.channels.remove(name).is_some()
    }

    pub(crate) fn channel_mut(&mut self, name: &str) -> Result<&mut Channel, RuntimeError> {
        self.channels
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NoSuchChannel { name: name.to_string() })
    }

    /// Evaluation-stack depth, exposed for invariant checks.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.depth()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("stack", &self.stack.len())
            .field("scopes", &self.scopes.depth())
            .finish()
    }
}

/// A refcounted job handle. The job is destroyed when its evaluation stack
/// is empty and the last handle is dropped.
#[derive(Clone)]
pub struct JobHandle(pub(crate) Rc<RefCell<Job>>);

impl JobHandle {
    pub fn name(&self) -> Rc<str> {
        Rc::clone(self.0.borrow().name())
    }

    pub fn state(&self) -> JobState {
        self.0.borrow().state()
    }

    pub fn error(&self) -> Option<String> {
        self.0.borrow().error().map(str::to_owned)
    }

    pub fn result(&self) -> Option<Value> {
        self.0.borrow().result()
    }

    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Run `f` against the job. Must not be called while the job is being
    /// pumped (handlers already hold the borrow).
    pub fn with<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.0.borrow(), f)
    }
}

enum PumpOutcome {
    Budget,
    Finished,
    Blocked,
    Waiting,
    Errored,
}

struct RuntimeInner {
    run: VecDeque<JobHandle>,
    blocked: Vec<JobHandle>,
    wait: VecDeque<JobHandle>,
    current: Option<JobHandle>,
    last_heartbeat: u64,
    armed: bool,
    internals: Vec<(Rc<str>, usize, InternalFn)>,
}

/// The cooperative script runtime driving jobs from a reactor heartbeat.
/// Cloning shares the same queues.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RefCell<RuntimeInner>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Runtime {
    pub fn new() -> Runtime {
        let internals: Vec<(Rc<str>, usize, InternalFn)> = vec![
            (Rc::from("channel"), 1, builtin_channel as InternalFn),
            (Rc::from("channel_free"), 1, builtin_channel_free as InternalFn),
            (Rc::from("send"), 2, builtin_send as InternalFn),
            (Rc::from("recv"), 1, builtin_recv as InternalFn),
            (Rc::from("dump"), 0, builtin_dump as InternalFn),
        ];
        Runtime {
            inner: Rc::new(RefCell::new(RuntimeInner {
                run: VecDeque::new(),
                blocked: Vec::new(),
                wait: VecDeque::new(),
                current: None,
                last_heartbeat: 0,
                armed: false,
                internals,
            })),
        }
    }

    /// Register a host function installed into every job created afterwards.
    pub fn register_internal(&self, name: &str, nargs: usize, f: InternalFn) {
        self.inner.borrow_mut().internals.push((Rc::from(name), nargs, f));
    }

    /// Create a job from a parsed statement list and queue it to run.
    pub fn new_job(&self, stm: Rc<Stm>, name: &str) -> JobHandle {
        let mut job = Job::new(stm, name);
        for (fname, nargs, f) in &self.inner.borrow().internals {
            let detail = FuncDetail::internal(Rc::clone(fname), *nargs, *f);
            let var = Variable::new(Some(Rc::clone(fname)), Value::Func(detail));
            job.scopes.join(Rc::clone(fname), Symbol::Var(var.into_ref()));
        }
        let handle = JobHandle(Rc::new(RefCell::new(job)));
        self.inner.borrow_mut().run.push_back(handle.clone());
        handle
    }

    /// Arm the heartbeat on the reactor. Idempotent; queue transitions that
    /// make a job runnable re-arm automatically.
    pub fn start(&self, reactor: &mut Reactor) {
        RuntimeInner::arm(&self.inner, reactor);
    }

    /// No job is runnable, blocked or waiting.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.borrow();
        inner.run.is_empty()
            && inner.blocked.is_empty()
            && inner.wait.is_empty()
            && inner.current.is_none()
    }

    /// (run, blocked, wait) queue lengths.
    pub fn queue_lens(&self) -> (usize, usize, usize) {
        let inner = self.inner.borrow();
        (inner.run.len(), inner.blocked.len(), inner.wait.len())
    }

    pub fn last_heartbeat(&self) -> u64 {
        self.inner.borrow().last_heartbeat
    }

    /// Host → script send. Fills the channel slot and re-queues the job if
    /// it was blocked on this channel.
    pub fn send(
        &self,
        reactor: &mut Reactor,
        handle: &JobHandle,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let woke = {
            let mut job = handle.0.borrow_mut();
            job.channel_mut(name)?.post_from_host(name, value)?;
            let blocked_here = job.blocked_on.as_deref() == Some(name);
            if blocked_here {
                job.blocked_on = None;
                job.channel_mut(name)?.script_waiting = false;
            }
            blocked_here
        };
        if woke {
            self.wake(reactor, handle);
        }
        Ok(())
    }

    /// Host-side read of a script → host slot. Draining the slot re-queues
    /// a job that blocked posting into it.
    pub fn recv(
        &self,
        reactor: &mut Reactor,
        handle: &JobHandle,
        name: &str,
    ) -> Result<Option<Value>, RuntimeError> {
        let (value, woke) = {
            let mut job = handle.0.borrow_mut();
            let value = job.channel_mut(name)?.take_for_host();
            let blocked_here =
                value.is_some() && job.blocked_on.as_deref() == Some(name);
            if blocked_here {
                job.blocked_on = None;
            }
            (value, blocked_here)
        };
        if woke {
            self.wake(reactor, handle);
        }
        Ok(value)
    }

    pub fn set_channel_handler(
        &self,
        handle: &JobHandle,
        name: &str,
        handler: Option<ChannelHandler>,
    ) -> Result<(), RuntimeError> {
        handle.0.borrow_mut().channel_mut(name)?.set_handler(handler);
        Ok(())
    }

    /// Move a runnable job to the wait queue (a resource it needs is held
    /// elsewhere).
    pub fn suspend(&self, handle: &JobHandle) {
        let mut inner = self.inner.borrow_mut();
        if let Some(i) = inner.run.iter().position(|h| Rc::ptr_eq(&h.0, &handle.0)) {
            inner.run.remove(i);
        }
        handle.0.borrow_mut().state = JobState::Waiting;
        inner.wait.push_back(handle.clone());
    }

    /// Release the longest-waiting job back to the run queue.
    pub fn resume_next(&self, reactor: &mut Reactor) -> Option<JobHandle> {
        let handle = self.inner.borrow_mut().wait.pop_front()?;
        handle.0.borrow_mut().state = JobState::Ready;
        self.inner.borrow_mut().run.push_back(handle.clone());
        RuntimeInner::arm(&self.inner, reactor);
        Some(handle)
    }

    fn wake(&self, reactor: &mut Reactor, handle: &JobHandle) {
        let mut inner = self.inner.borrow_mut();
        if let Some(i) = inner.blocked.iter().position(|h| Rc::ptr_eq(&h.0, &handle.0)) {
            let h = inner.blocked.remove(i);
            h.0.borrow_mut().state = JobState::Ready;
            inner.run.push_back(h);
            drop(inner);
            RuntimeInner::arm(&self.inner, reactor);
        }
    }
}

impl RuntimeInner {
    fn arm(this: &Rc<RefCell<RuntimeInner>>, reactor: &mut Reactor) {
        {
            let mut inner = this.borrow_mut();
            if inner.armed || inner.run.is_empty() {
                return;
            }
            inner.armed = true;
        }
        let rt = Rc::clone(this);
        // Deadline zero: the pump runs on the very next dispatch iteration,
        // after fds, signals and earlier timers have been served.
        reactor.set_timer(0, move |re| RuntimeInner::tick(rt, re));
    }

    fn tick(this: Rc<RefCell<RuntimeInner>>, reactor: &mut Reactor) {
        let handle = {
            let mut inner = this.borrow_mut();
            inner.armed = false;
            inner.last_heartbeat = now_us();
            match inner.run.pop_front() {
                Some(h) => {
                    inner.current = Some(h.clone());
                    h
                }
                None => return,
            }
        };

        let outcome = pump(&mut handle.0.borrow_mut());

        let mut inner = this.borrow_mut();
        inner.current = None;
        match outcome {
            PumpOutcome::Budget => inner.run.push_back(handle),
            PumpOutcome::Blocked => inner.blocked.push(handle),
            PumpOutcome::Waiting => inner.wait.push_back(handle),
            // Finished and errored jobs leave the queues; the job lives on
            // only through host handles.
            PumpOutcome::Finished | PumpOutcome::Errored => {}
        }
        drop(inner);
        RuntimeInner::arm(&this, reactor);
    }
}

/// Advance a job by at most its step budget.
fn pump(job: &mut Job) -> PumpOutcome {
    let mut steps = job.step_budget;
    loop {
        if job.stack.is_empty() {
            job.result = job.ret.take();
            job.state = JobState::Done;
            return PumpOutcome::Finished;
        }
        match dispatch_step(job) {
            Ok(StepFlow::Continue) => {
                steps -= 1;
                if steps == 0 {
                    return PumpOutcome::Budget;
                }
            }
            Ok(StepFlow::Block) => {
                job.state = JobState::Blocked;
                return PumpOutcome::Blocked;
            }
            Ok(StepFlow::Wait) => {
                job.state = JobState::Waiting;
                return PumpOutcome::Waiting;
            }
            Err(e) => {
                job.set_error(&e.to_string());
                // Uncaught runtime errors unwind the whole stack.
                job.stack.clear();
                job.state = JobState::Failed;
                return PumpOutcome::Errored;
            }
        }
    }
}

/// One unit of evaluation work: pop the top activation, dispatch on its
/// form, apply the handler's directive.
pub(crate) fn dispatch_step(job: &mut Job) -> Result<StepFlow, RuntimeError> {
    let mut node = match job.stack.pop() {
        Some(n) => n,
        None => return Ok(StepFlow::Continue),
    };
    match step_node(job, &mut node)? {
        StepResult::Stay => job.stack.push(node),
        StepResult::Child(child) => {
            job.stack.push(node);
            job.stack.push(child);
        }
        StepResult::Done(ret) => job.ret = Some(ret),
        StepResult::Block => {
            job.stack.push(node);
            return Ok(StepFlow::Block);
        }
        StepResult::Wait => {
            job.stack.push(node);
            return Ok(StepFlow::Wait);
        }
        StepResult::BreakLoop => unwind_loop(job, true),
        StepResult::ContinueLoop => unwind_loop(job, false),
        StepResult::Return(ret) => unwind_return(job, ret),
    }
    Ok(StepFlow::Continue)
}

/// The dispatch lookup table: stack-node tag to step handler.
fn step_node(job: &mut Job, node: &mut StackNode) -> Result<StepResult, RuntimeError> {
    match &node.form {
        NodeForm::Stm(s) => {
            let s = Rc::clone(s);
            job.step_stm(node, &s)
        }
        NodeForm::FuncDef(d) => {
            let d = Rc::clone(d);
            job.step_funcdef(node, &d)
        }
        NodeForm::SetDef(d) => {
            let d = Rc::clone(d);
            job.step_setdef(node, &d)
        }
        NodeForm::SetStm(d) => {
            let d = Rc::clone(d);
            job.step_setstm(node, &d)
        }
        NodeForm::Block(b) => {
            let b = Rc::clone(b);
            job.step_block(node, &b)
        }
        NodeForm::While(w) => {
            let w = Rc::clone(w);
            job.step_while(node, &w)
        }
        NodeForm::Switch(s) => {
            let s = Rc::clone(s);
            job.step_switch(node, &s)
        }
        NodeForm::SwitchStm(s) => {
            let s = Rc::clone(s);
            job.step_switchstm(node, &s)
        }
        NodeForm::For(f) => {
            let f = Rc::clone(f);
            job.step_for(node, &f)
        }
        NodeForm::If(i) => {
            let i = Rc::clone(i);
            job.step_if(node, &i)
        }
        NodeForm::Exp(e) => {
            let e = Rc::clone(e);
            job.step_exp(node, &e)
        }
        NodeForm::Assign(a) => {
            let a = Rc::clone(a);
            job.step_assign(node, &a)
        }
        NodeForm::LogicLow(x) => {
            let x = Rc::clone(x);
            job.step_logic_low(node, &x)
        }
        NodeForm::LogicHigh(x) => {
            let x = Rc::clone(x);
            job.step_logic_high(node, &x)
        }
        NodeForm::RelativeLow(x) => {
            let x = Rc::clone(x);
            job.step_relative_low(node, &x)
        }
        NodeForm::RelativeHigh(x) => {
            let x = Rc::clone(x);
            job.step_relative_high(node, &x)
        }
        NodeForm::Move(x) => {
            let x = Rc::clone(x);
            job.step_move(node, &x)
        }
        NodeForm::AddSub(x) => {
            let x = Rc::clone(x);
            job.step_addsub(node, &x)
        }
        NodeForm::MulDiv(x) => {
            let x = Rc::clone(x);
            job.step_muldiv(node, &x)
        }
        NodeForm::Suffix(x) => {
            let x = Rc::clone(x);
            job.step_suffix(node, &x)
        }
        NodeForm::Locate(x) => {
            let x = Rc::clone(x);
            job.step_locate(node, &x)
        }
        NodeForm::Spec(x) => {
            let x = Rc::clone(x);
            job.step_spec(node, &x)
        }
        NodeForm::Factor(x) => {
            let x = Rc::clone(x);
            job.step_factor(node, &x)
        }
        NodeForm::ElemList(x) => {
            let x = Rc::clone(x);
            job.step_elemlist(node, &x)
        }
        NodeForm::FuncSuffix(x) => {
            let x = Rc::clone(x);
            job.step_funcsuffix(node, &x)
        }
        NodeForm::FuncCall(x) => {
            let x = Rc::clone(x);
            job.step_funccall(node, &x)
        }
    }
}

/// Unwind to the nearest enclosing loop activation. `break` pops the loop
/// itself; `continue` leaves it on the stack, where its pre-set sub-step
/// resumes at the update/condition phase. Never crosses a call boundary.
fn unwind_loop(job: &mut Job, inclusive: bool) {
    loop {
        let is_call = match job.stack.last() {
            None => break,
            Some(top) => top.call,
        };
        if is_call {
            break;
        }
        let is_loop = matches!(
            job.stack.last().map(|n| &n.form),
            Some(NodeForm::While(_)) | Some(NodeForm::For(_))
        );
        let is_switch = matches!(job.stack.last().map(|n| &n.form), Some(NodeForm::SwitchStm(_)));
        if is_loop {
            if inclusive {
                job.stack.pop();
            }
            break;
        }
        if is_switch && inclusive {
            job.stack.pop();
            break;
        }
        job.stack.pop();
    }
    job.ret = Some(RetExpr::nil());
}

/// Unwind to the activation that made the current call. Scope teardown is
/// left to that activation's post-call step, so the normal-completion and
/// early-return paths converge.
fn unwind_return(job: &mut Job, ret: RetExpr) {
    loop {
        match job.stack.last() {
            None => break,
            Some(top) if top.call => break,
            Some(_) => {
                job.stack.pop();
            }
        }
    }
    job.ret = Some(ret);
}

// --- Base internal library ------------------------------------------------

fn arg_value(args: &[VarRef], i: usize) -> Value {
    args.get(i).map(|v| v.borrow().value()).unwrap_or(Value::Nil)
}

fn builtin_channel(job: &mut Job, args: &[VarRef]) -> Result<Option<RetExpr>, RuntimeError> {
    let name = arg_value(args, 0).to_str();
    job.channel_new(&name);
    Ok(Some(RetExpr::nil()))
}

fn builtin_channel_free(job: &mut Job, args: &[VarRef]) -> Result<Option<RetExpr>, RuntimeError> {
    let name = arg_value(args, 0).to_str();
    Ok(Some(RetExpr::bool(job.channel_free(&name))))
}

fn builtin_send(job: &mut Job, args: &[VarRef]) -> Result<Option<RetExpr>, RuntimeError> {
    let name = arg_value(args, 0).to_str();
    let value = arg_value(args, 1);
    if job.channel_mut(&name)?.post_from_script(value)? {
        job.blocked_on = None;
        Ok(Some(RetExpr::nil()))
    } else {
        job.blocked_on = Some(Rc::clone(&name));
        Ok(None)
    }
}

fn builtin_recv(job: &mut Job, args: &[VarRef]) -> Result<Option<RetExpr>, RuntimeError> {
    let name = arg_value(args, 0).to_str();
    match job.channel_mut(&name)?.take_for_script() {
        Some(value) => {
            job.channel_mut(&name)?.script_waiting = false;
            job.blocked_on = None;
            Ok(Some(RetExpr::from_value(value)))
        }
        None => {
            job.channel_mut(&name)?.script_waiting = true;
            job.blocked_on = Some(Rc::clone(&name));
            Ok(None)
        }
    }
}

fn builtin_dump(job: &mut Job, _args: &[VarRef]) -> Result<Option<RetExpr>, RuntimeError> {
    let summary = format!(
        "job '{}': stack depth {}, scope depth {}",
        job.name,
        job.stack.len(),
        job.scopes.depth()
    );
    Ok(Some(RetExpr::from_value(Value::Str(Rc::from(summary.as_str())))))
}
