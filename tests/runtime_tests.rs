// Integration tests for the cooperative script runtime

use std::cell::RefCell;
use std::rc::Rc;

use riptide::ast::*;
use riptide::event::Reactor;
use riptide::interpreter::engine::{JobHandle, JobState, Runtime};
use riptide::memory::value::Value;

// --- AST building helpers -------------------------------------------------

fn expr_stmt(x: impl Into<Exp>) -> Statement {
    Statement::Exp(Exp::lift(x))
}

fn set_var(name: &str, rhs: impl Into<Assign>) -> Statement {
    expr_stmt(Assign::binding(Factor::id(name), AssignOp::Assign, rhs))
}

fn add(l: impl Into<MulDiv>, r: impl Into<AddSub>) -> AddSub {
    AddSub { lhs: Rc::new(l.into()), op: Some(AddSubOp::Plus), rhs: Some(Rc::new(r.into())) }
}

fn mul(l: impl Into<Suffix>, r: impl Into<MulDiv>) -> MulDiv {
    MulDiv { lhs: Rc::new(l.into()), op: Some(MulDivOp::Mul), rhs: Some(Rc::new(r.into())) }
}

fn div(l: impl Into<Suffix>, r: impl Into<MulDiv>) -> MulDiv {
    MulDiv { lhs: Rc::new(l.into()), op: Some(MulDivOp::Div), rhs: Some(Rc::new(r.into())) }
}

fn lt(l: impl Into<Move>, r: impl Into<RelativeHigh>) -> RelativeHigh {
    RelativeHigh { lhs: Rc::new(l.into()), op: Some(RelativeHighOp::Lt), rhs: Some(Rc::new(r.into())) }
}

fn gt(l: impl Into<Move>, r: impl Into<RelativeHigh>) -> RelativeHigh {
    RelativeHigh { lhs: Rc::new(l.into()), op: Some(RelativeHighOp::Gt), rhs: Some(Rc::new(r.into())) }
}

fn eq_cmp(l: impl Into<RelativeHigh>, r: impl Into<RelativeLow>) -> RelativeLow {
    RelativeLow { lhs: Rc::new(l.into()), op: Some(RelativeLowOp::Eq), rhs: Some(Rc::new(r.into())) }
}

fn inc(name: &str) -> Suffix {
    Suffix { lhs: Rc::new(Locate::from(Factor::id(name))), op: Some(SuffixOp::Inc) }
}

fn call(name: &str, args: Vec<Assign>) -> Spec {
    Spec::FuncCall(Rc::new(FuncCallNode {
        name: Rc::from(name),
        args: args.into_iter().map(Rc::new).collect(),
    }))
}

fn prop_of(base: &str, name: &str) -> Locate {
    Locate {
        base: Rc::new(Spec::Factor(Rc::new(Factor::id(base)))),
        parts: vec![LocatePart::Property(Rc::from(name))],
    }
}

fn ret(e: impl Into<Exp>) -> Statement {
    Statement::Block(Rc::new(Block::Return(Some(Exp::lift(e)))))
}

fn body_of(stmts: Vec<Statement>) -> Rc<Block> {
    Rc::new(Block::Stm(Stm::new(stmts)))
}

/// Pump the runtime from a private reactor until every queue drains.
fn drive(rt: &Runtime) {
    let mut re = Reactor::new(false).expect("reactor");
    rt.start(&mut re);
    let watch = rt.clone();
    re.set_callback(move |re| {
        if watch.is_idle() {
            re.set_break();
        }
    });
    re.set_timer(10_000, |re| re.set_break());
    re.dispatch().expect("dispatch");
}

fn run_script(stmts: Vec<Statement>) -> JobHandle {
    let rt = Runtime::new();
    let job = rt.new_job(Stm::new(stmts), "test");
    drive(&rt);
    job
}

// --- Straight-line evaluation --------------------------------------------

#[test]
fn simple_arithmetic() {
    let job = run_script(vec![
        set_var("x", Factor::Int(5)),
        set_var("y", Factor::Int(10)),
        set_var("z", add(Factor::id("x"), Factor::id("y"))),
        expr_stmt(Factor::id("z")),
    ]);
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.result().expect("result").to_int(), 15);
}

#[test]
fn int_real_promotion_matches_real_arithmetic() {
    let job = run_script(vec![expr_stmt(add(Factor::Int(2), Factor::Real(3.0)))]);
    match job.result().expect("result") {
        Value::Real(r) => assert_eq!(r, 5.0),
        other => panic!("expected real, got {:?}", other),
    }
}

#[test]
fn string_concat_and_comparison() {
    let job = run_script(vec![
        set_var("s", add(Factor::str("ab"), Factor::str("cd"))),
        expr_stmt(eq_cmp(Factor::id("s"), Factor::str("abcd"))),
    ]);
    assert!(job.result().expect("result").truthy());
}

// --- Functions ------------------------------------------------------------

#[test]
fn function_call_with_return() {
    let def = FuncDef {
        name: Rc::from("sum2"),
        params: vec![
            Param { name: Rc::from("a"), default: None },
            Param { name: Rc::from("b"), default: None },
        ],
        body: Stm::new(vec![ret(add(Factor::id("a"), Factor::id("b")))]),
    };
    let job = run_script(vec![
        Statement::FuncDef(Rc::new(def)),
        set_var("r", call("sum2", vec![Assign::from(Factor::Int(3)), Assign::from(Factor::Int(4))])),
        expr_stmt(Factor::id("r")),
    ]);
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.result().expect("result").to_int(), 7);
}

#[test]
fn omitted_trailing_arguments_take_defaults() {
    let def = FuncDef {
        name: Rc::from("bump"),
        params: vec![
            Param { name: Rc::from("a"), default: None },
            Param { name: Rc::from("by"), default: Some(Rc::new(Factor::Int(10))) },
        ],
        body: Stm::new(vec![ret(add(Factor::id("a"), Factor::id("by")))]),
    };
    let job = run_script(vec![
        Statement::FuncDef(Rc::new(def)),
        expr_stmt(call("bump", vec![Assign::from(Factor::Int(1))])),
    ]);
    assert_eq!(job.result().expect("result").to_int(), 11);
}

#[test]
fn too_many_arguments_is_an_arity_error() {
    let def = FuncDef {
        name: Rc::from("one"),
        params: vec![Param { name: Rc::from("a"), default: None }],
        body: Stm::new(vec![ret(Factor::id("a"))]),
    };
    let job = run_script(vec![
        Statement::FuncDef(Rc::new(def)),
        expr_stmt(call(
            "one",
            vec![
                Assign::from(Factor::Int(1)),
                Assign::from(Factor::Int(2)),
                Assign::from(Factor::Int(3)),
            ],
        )),
    ]);
    assert_eq!(job.state(), JobState::Failed);
    assert!(job.error().expect("error").contains("takes 1 argument"));
}

#[test]
fn arguments_pass_by_value() {
    // The callee mutates its formal; the caller's variable is untouched.
    let def = FuncDef {
        name: Rc::from("clobber"),
        params: vec![Param { name: Rc::from("a"), default: None }],
        body: Stm::new(vec![
            set_var("a", Factor::Int(99)),
            ret(Factor::id("a")),
        ]),
    };
    let job = run_script(vec![
        Statement::FuncDef(Rc::new(def)),
        set_var("x", Factor::Int(1)),
        expr_stmt(call("clobber", vec![Assign::from(Factor::id("x"))])),
        expr_stmt(Factor::id("x")),
    ]);
    assert_eq!(job.result().expect("result").to_int(), 1);
}

// --- Control flow ---------------------------------------------------------

#[test]
fn while_loop_accumulates() {
    let job = run_script(vec![
        set_var("i", Factor::Int(0)),
        set_var("s", Factor::Int(0)),
        Statement::While(Rc::new(While {
            condition: Exp::lift(lt(Factor::id("i"), Factor::Int(5))),
            body: body_of(vec![
                expr_stmt(Assign::binding(
                    Factor::id("s"),
                    AssignOp::PlusEq,
                    Factor::id("i"),
                )),
                expr_stmt(inc("i")),
            ]),
        })),
        expr_stmt(Factor::id("s")),
    ]);
    assert_eq!(job.result().expect("result").to_int(), 10);
}

#[test]
fn break_and_continue_unwind_to_the_loop() {
    // while (true) { i++; if (i > 4) break; if (i == 2) continue; s += i; }
    let job = run_script(vec![
        set_var("i", Factor::Int(0)),
        set_var("s", Factor::Int(0)),
        Statement::While(Rc::new(While {
            condition: Exp::lift(Factor::Bool(true)),
            body: body_of(vec![
                expr_stmt(inc("i")),
                Statement::If(Rc::new(If {
                    condition: Exp::lift(gt(Factor::id("i"), Factor::Int(4))),
                    then_blk: Rc::new(Block::Break),
                    else_blk: None,
                })),
                Statement::If(Rc::new(If {
                    condition: Exp::lift(eq_cmp(Factor::id("i"), Factor::Int(2))),
                    then_blk: Rc::new(Block::Continue),
                    else_blk: None,
                })),
                expr_stmt(Assign::binding(
                    Factor::id("s"),
                    AssignOp::PlusEq,
                    Factor::id("i"),
                )),
            ]),
        })),
        expr_stmt(Factor::id("s")),
    ]);
    assert_eq!(job.result().expect("result").to_int(), 8);
}

#[test]
fn for_loop_runs_all_four_phases() {
    let job = run_script(vec![
        set_var("s", Factor::Int(0)),
        Statement::For(Rc::new(For {
            init: Some(Exp::lift(Assign::binding(
                Factor::id("i"),
                AssignOp::Assign,
                Factor::Int(0),
            ))),
            condition: Some(Exp::lift(lt(Factor::id("i"), Factor::Int(4)))),
            update: Some(Exp::lift(inc("i"))),
            body: body_of(vec![expr_stmt(Assign::binding(
                Factor::id("s"),
                AssignOp::PlusEq,
                Factor::id("i"),
            ))]),
        })),
        expr_stmt(Factor::id("s")),
    ]);
    assert_eq!(job.result().expect("result").to_int(), 6);
}

#[test]
fn if_else_takes_the_right_branch() {
    let job = run_script(vec![
        set_var("x", Factor::Int(3)),
        Statement::If(Rc::new(If {
            condition: Exp::lift(gt(Factor::id("x"), Factor::Int(5))),
            then_blk: Rc::new(Block::Exp(Exp::lift(Assign::binding(
                Factor::id("r"),
                AssignOp::Assign,
                Factor::Int(1),
            )))),
            else_blk: Some(Rc::new(Block::Exp(Exp::lift(Assign::binding(
                Factor::id("r"),
                AssignOp::Assign,
                Factor::Int(2),
            ))))),
        })),
        expr_stmt(Factor::id("r")),
    ]);
    assert_eq!(job.result().expect("result").to_int(), 2);
}

fn switch_script(subject: i64) -> Vec<Statement> {
    // switch (x) { case 2: r += 10; break; case 3: r += 100; default: r += 1000; }
    let arm = |value: Option<i64>, stmts: Vec<Statement>| SwitchArm {
        value: value.map(|v| Rc::new(Factor::Int(v))),
        body: Some(Stm::new(stmts)),
    };
    vec![
        set_var("x", Factor::Int(subject)),
        set_var("r", Factor::Int(0)),
        Statement::Switch(Rc::new(Switch {
            subject: Exp::lift(Factor::id("x")),
            arms: vec![
                arm(
                    Some(2),
                    vec![
                        expr_stmt(Assign::binding(
                            Factor::id("r"),
                            AssignOp::PlusEq,
                            Factor::Int(10),
                        )),
                        Statement::Block(Rc::new(Block::Break)),
                    ],
                ),
                arm(
                    Some(3),
                    vec![expr_stmt(Assign::binding(
                        Factor::id("r"),
                        AssignOp::PlusEq,
                        Factor::Int(100),
                    ))],
                ),
                arm(
                    None,
                    vec![expr_stmt(Assign::binding(
                        Factor::id("r"),
                        AssignOp::PlusEq,
                        Factor::Int(1000),
                    ))],
                ),
            ],
        })),
        expr_stmt(Factor::id("r")),
    ]
}

#[test]
fn switch_matches_and_breaks() {
    let job = run_script(switch_script(2));
    assert_eq!(job.result().expect("result").to_int(), 10);
}

#[test]
fn switch_falls_through_without_break() {
    let job = run_script(switch_script(3));
    // Arm 3 falls through the default arm.
    assert_eq!(job.result().expect("result").to_int(), 1100);
}

#[test]
fn switch_default_only_when_nothing_matches() {
    let job = run_script(switch_script(9));
    assert_eq!(job.result().expect("result").to_int(), 1000);
}

// --- Sets, objects, arrays ------------------------------------------------

#[test]
fn sets_instantiate_and_methods_see_this() {
    let sum = FuncDef {
        name: Rc::from("sum"),
        params: vec![],
        body: Stm::new(vec![ret(add(prop_of("this", "x"), prop_of("this", "y")))]),
    };
    let point = SetDef {
        name: Rc::from("Point"),
        members: vec![
            SetMember::Var(Rc::from("x")),
            SetMember::Var(Rc::from("y")),
            SetMember::Func(Rc::new(sum)),
        ],
    };
    let method_call = Locate {
        base: Rc::new(Spec::Factor(Rc::new(Factor::id("p")))),
        parts: vec![
            LocatePart::Property(Rc::from("sum")),
            LocatePart::Call(Rc::new(FuncSuffix { args: vec![] })),
        ],
    };
    let job = run_script(vec![
        Statement::SetDef(Rc::new(point)),
        set_var("p", call("Point", vec![])),
        expr_stmt(Assign::binding(prop_of("p", "x"), AssignOp::Assign, Factor::Int(10))),
        expr_stmt(Assign::binding(prop_of("p", "y"), AssignOp::Assign, Factor::Int(20))),
        expr_stmt(method_call),
    ]);
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.result().expect("result").to_int(), 30);
}

#[test]
fn array_literal_keeps_both_indexes_consistent() {
    let literal = Factor::Array(Rc::new(ElemList {
        elems: vec![
            Elem {
                key: Some(Rc::new(Assign::from(Factor::str("a")))),
                value: Rc::new(Assign::from(Factor::Int(1))),
            },
            Elem {
                key: Some(Rc::new(Assign::from(Factor::str("b")))),
                value: Rc::new(Assign::from(Factor::Int(2))),
            },
        ],
    }));
    let job = run_script(vec![expr_stmt(literal)]);
    let arr = match job.result().expect("result") {
        Value::Array(a) => a,
        other => panic!("expected array, got {:?}", other),
    };

    assert!(arr.borrow().is_consistent());
    assert!(arr.borrow_mut().remove(&Value::Str(Rc::from("a"))).unwrap());

    let arr = arr.borrow();
    assert!(arr.is_consistent());
    assert_eq!(arr.len(), 1);
    assert!(arr.get(&Value::Str(Rc::from("a"))).is_none());
    let remaining: Vec<(String, i64)> = arr
        .iter()
        .map(|e| {
            let e = e.borrow();
            let key = e.key.value().to_str().to_string();
            let value = e.value.borrow().value().to_int();
            (key, value)
        })
        .collect();
    assert_eq!(remaining, vec![("b".to_string(), 2)]);
}

#[test]
fn subscript_assignment_writes_through() {
    let subscript = |key: &str| Locate {
        base: Rc::new(Spec::Factor(Rc::new(Factor::id("a")))),
        parts: vec![LocatePart::Index(Some(Exp::lift(Factor::str(key))))],
    };
    let job = run_script(vec![
        set_var("a", Factor::Array(Rc::new(ElemList { elems: vec![] }))),
        expr_stmt(Assign::binding(subscript("k"), AssignOp::Assign, Factor::Int(5))),
        expr_stmt(subscript("k")),
    ]);
    assert_eq!(job.result().expect("result").to_int(), 5);
}

// --- Budgeting, queues, errors --------------------------------------------

#[test]
fn long_job_yields_to_concurrent_timers() {
    let rt = Runtime::new();
    let job = rt.new_job(
        Stm::new(vec![
            set_var("i", Factor::Int(0)),
            Statement::While(Rc::new(While {
                condition: Exp::lift(lt(Factor::id("i"), Factor::Int(10_000))),
                body: Rc::new(Block::Exp(Exp::lift(inc("i")))),
            })),
            expr_stmt(Factor::id("i")),
        ]),
        "busy",
    );

    let mut re = Reactor::new(false).expect("reactor");
    rt.start(&mut re);

    let fired_mid_run = Rc::new(RefCell::new(false));
    {
        let fired_mid_run = Rc::clone(&fired_mid_run);
        let job = job.clone();
        re.set_timer(5, move |_| {
            // The step budget forces the job to still be mid-run when this
            // 5ms timer fires.
            *fired_mid_run.borrow_mut() = job.state() == JobState::Ready;
        });
    }
    let watch = rt.clone();
    re.set_callback(move |re| {
        if watch.is_idle() {
            re.set_break();
        }
    });
    re.set_timer(30_000, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.result().expect("result").to_int(), 10_000);
    assert!(*fired_mid_run.borrow(), "timer should have fired between step slices");
}

#[test]
fn division_by_zero_fails_the_job() {
    let job = run_script(vec![expr_stmt(div(Factor::Int(1), Factor::Int(0)))]);
    assert_eq!(job.state(), JobState::Failed);
    assert!(job.error().expect("error").contains("division by zero"));
    // The uncaught error unwound the whole stack.
    assert_eq!(job.with(|j| j.stack_depth()), 0);
    assert_eq!(job.with(|j| j.scope_depth()), 1);
}

#[test]
fn finished_job_is_only_kept_alive_by_host_handles() {
    let job = run_script(vec![expr_stmt(Factor::Int(1))]);
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.refcount(), 1);
}

#[test]
fn suspend_and_resume_route_through_the_wait_queue() {
    let rt = Runtime::new();
    let job = rt.new_job(Stm::new(vec![expr_stmt(Factor::Int(42))]), "w");
    rt.suspend(&job);
    assert_eq!(rt.queue_lens(), (0, 0, 1));
    assert_eq!(job.state(), JobState::Waiting);

    let mut re = Reactor::new(false).expect("reactor");
    rt.start(&mut re);
    {
        let rt2 = rt.clone();
        re.set_timer(10, move |re| {
            rt2.resume_next(re);
        });
    }
    let watch = rt.clone();
    re.set_callback(move |re| {
        if watch.is_idle() {
            re.set_break();
        }
    });
    re.set_timer(5_000, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.result().expect("result").to_int(), 42);
}

// --- Message channels -----------------------------------------------------

#[test]
fn script_blocks_reading_until_host_sends() {
    let rt = Runtime::new();
    let job = rt.new_job(
        Stm::new(vec![
            expr_stmt(call("channel", vec![Assign::from(Factor::str("m"))])),
            set_var("x", call("recv", vec![Assign::from(Factor::str("m"))])),
            expr_stmt(mul(Factor::id("x"), Factor::Int(2))),
        ]),
        "reader",
    );

    let mut re = Reactor::new(false).expect("reactor");
    rt.start(&mut re);

    {
        let job = job.clone();
        re.set_timer(10, move |_| {
            assert_eq!(job.state(), JobState::Blocked, "reader parks on the empty channel");
        });
    }
    {
        let rt2 = rt.clone();
        let job = job.clone();
        re.set_timer(20, move |re| {
            rt2.send(re, &job, "m", Value::Int(21)).expect("host send");
        });
    }
    let watch = rt.clone();
    re.set_callback(move |re| {
        if watch.is_idle() {
            re.set_break();
        }
    });
    re.set_timer(5_000, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.result().expect("result").to_int(), 42);
}

#[test]
fn host_handler_receives_script_posts() {
    let rt = Runtime::new();
    let job = rt.new_job(
        Stm::new(vec![
            expr_stmt(call("channel", vec![Assign::from(Factor::str("m"))])),
            expr_stmt(call(
                "send",
                vec![Assign::from(Factor::str("m")), Assign::from(Factor::Int(7))],
            )),
            expr_stmt(Factor::Int(1)),
        ]),
        "writer",
    );

    // The channel must exist before a handler can be attached.
    job.with(|j| j.channel_new("m"));
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        rt.set_channel_handler(
            &job,
            "m",
            Some(Box::new(move |v| {
                seen.borrow_mut().push(v.to_int());
                Ok(())
            })),
        )
        .expect("set handler");
    }

    drive(&rt);

    assert_eq!(job.state(), JobState::Done);
    assert_eq!(*seen.borrow(), vec![7]);
}

#[test]
fn missing_channel_is_a_runtime_error() {
    let job = run_script(vec![expr_stmt(call(
        "recv",
        vec![Assign::from(Factor::str("nope"))],
    ))]);
    assert_eq!(job.state(), JobState::Failed);
    assert!(job.error().expect("error").contains("no message channel"));
}
