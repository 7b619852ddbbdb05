use classopt::jvm::opcodes::*;
use classopt::jvm::{
    assemble, ClassAccessFlags, ClassPool, CodeAttribute, ConstantIndex, Instruction, Item,
    LineNumber, LineSource, LocalOp, Method, MethodAccessFlags, MethodId, ProgramClass,
};
use classopt::optimize::{
    Optimizer, Retention, RuntimeProfile, Settings, ShortMethodPolicy, Statistics, VariableShrinker,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn code(max_stack: u16, max_locals: u16, items: &[Item<u32>]) -> CodeAttribute {
    CodeAttribute::new(max_stack, max_locals, assemble(items).unwrap().code)
}

fn optimizer(profile: RuntimeProfile) -> Optimizer<ShortMethodPolicy> {
    let mut settings = Settings::new();
    settings.runtime_profile = profile;
    Optimizer::new(settings, Retention::new(), ShortMethodPolicy::new(profile))
}

fn public_class(name: &str) -> ProgramClass {
    ProgramClass::new(name, Some("java/lang/Object"), ClassAccessFlags::PUBLIC)
}

const STATIC: MethodAccessFlags = MethodAccessFlags::STATIC;

/// Class with a static `f(I)I` and a static `g()V` that calls `f(5)` and then pads itself out to
/// 40 bytes with `nop`s
fn program(f_body: Vec<Item<u32>>) -> (ClassPool, MethodId, MethodId) {
    let mut class = public_class("a/Program");
    let f = class.add_method(Method::new(STATIC, "f", "(I)I").with_code(code(2, 1, &f_body)));

    let f_ref = class.constants.get_method_ref("a/Program", "f", "(I)I", false).unwrap();
    let mut g_body: Vec<Item<u32>> = vec![
        Instruction::BiPush(5).into(),
        Instruction::Constant(INVOKESTATIC, f_ref).into(),
        Instruction::Local(LocalOp::IStore, 0).into(),
    ];
    g_body.extend((0..33).map(|_| Item::from(Instruction::Simple(NOP))));
    g_body.push(Instruction::Simple(RETURN).into());
    let g = class.add_method(Method::new(STATIC, "g", "()V").with_code(code(1, 1, &g_body)));

    let mut pool = ClassPool::new();
    let class = pool.add_class(class);
    (pool, MethodId { class, index: f }, MethodId { class, index: g })
}

#[test]
fn short_callee_is_inlined() {
    init_logging();
    let (mut pool, f, g) = program(vec![
        Instruction::Local(LocalOp::ILoad, 0).into(),
        Instruction::Simple(ICONST_1).into(),
        Instruction::Simple(IADD).into(),
        Instruction::Simple(ICONST_2).into(),
        Instruction::Simple(IMUL).into(),
        Instruction::Simple(IRETURN).into(),
    ]);
    let f_before = pool.method(f).code.clone().unwrap();
    assert_eq!(f_before.len(), 6);
    assert_eq!(pool.method(g).code.as_ref().unwrap().len(), 40);

    let statistics = optimizer(RuntimeProfile::Standard).optimize(&mut pool).unwrap();
    assert_eq!(statistics.inlined, 1);
    assert_eq!(statistics.skipped_methods, 0);

    // Invocation (3 bytes) replaced by one argument store and the callee minus its return
    let g_code = pool.method(g).code.as_ref().unwrap();
    assert_eq!(g_code.len(), 40 - 3 + 1 + 5);
    assert_eq!(g_code.max_locals, 2);
    assert_eq!(g_code.max_stack, 2);
    let expected_start = assemble::<u32>(&[
        Instruction::BiPush(5).into(),
        Instruction::Local(LocalOp::IStore, 1).into(),
        Instruction::Local(LocalOp::ILoad, 1).into(),
        Instruction::Simple(ICONST_1).into(),
        Instruction::Simple(IADD).into(),
        Instruction::Simple(ICONST_2).into(),
        Instruction::Simple(IMUL).into(),
        Instruction::Local(LocalOp::IStore, 0).into(),
    ])
    .unwrap()
    .code;
    assert_eq!(&g_code.code[..expected_start.len()], &expected_start[..]);

    assert_eq!(pool.method(f).code.as_ref(), Some(&f_before));
}

#[test]
fn long_callee_is_not_inlined_when_constrained() {
    init_logging();
    let mut f_body: Vec<Item<u32>> = vec![Instruction::Local(LocalOp::ILoad, 0).into()];
    f_body.extend((0..38).map(|_| Item::from(Instruction::Simple(NOP))));
    f_body.push(Instruction::Simple(IRETURN).into());
    let (mut pool, f, g) = program(f_body);
    assert_eq!(pool.method(f).code.as_ref().unwrap().len(), 40);
    let g_before = pool.method(g).code.clone();

    let statistics = optimizer(RuntimeProfile::Constrained).optimize(&mut pool).unwrap();
    assert_eq!(statistics, Statistics::default());
    assert_eq!(pool.method(g).code, g_before);
}

#[test]
fn method_is_never_inlined_into_itself() {
    init_logging();
    let mut class = public_class("a/Loop");
    let spin_ref = class.constants.get_method_ref("a/Loop", "spin", "()V", false).unwrap();
    let spin = code(0, 0, &[
        Instruction::Constant(INVOKESTATIC, spin_ref).into(),
        Instruction::Simple(RETURN).into(),
    ]);
    let spin = class.add_method(Method::new(STATIC, "spin", "()V").with_code(spin));
    let mut pool = ClassPool::new();
    let class = pool.add_class(class);
    let spin = MethodId { class, index: spin };
    let before = pool.method(spin).code.clone();

    let mut optimizer = optimizer(RuntimeProfile::Constrained);
    assert_eq!(optimizer.optimize(&mut pool).unwrap().inlined, 0);
    assert_eq!(pool.method(spin).code, before);
}

#[test]
fn shrinking_twice_changes_nothing() {
    init_logging();
    let mut class = public_class("a/Locals");
    let body = code(1, 3, &[
        Instruction::Simple(ICONST_0).into(),
        Instruction::Local(LocalOp::IStore, 2).into(),
        Instruction::Local(LocalOp::ILoad, 2).into(),
        Instruction::Simple(POP).into(),
        Instruction::Simple(RETURN).into(),
    ]);
    let method = class.add_method(Method::new(STATIC, "m", "()V").with_code(body));
    let mut pool = ClassPool::new();
    let class = pool.add_class(class);
    let method = MethodId { class, index: method };

    let mut optimizer = optimizer(RuntimeProfile::Standard);
    assert_eq!(optimizer.optimize(&mut pool).unwrap().shrunk, 1);
    let once = pool.method(method).code.clone().unwrap();
    assert_eq!(once.max_locals, 1);

    assert_eq!(optimizer.optimize(&mut pool).unwrap().shrunk, 0);
    assert_eq!(pool.method(method).code.as_ref(), Some(&once));

    let mut again = once.clone();
    assert!(VariableShrinker::shrink(&mut again, 0, None).unwrap().is_identity());
    assert_eq!(again, once);
}

#[test]
fn inlined_lines_are_linearized() {
    init_logging();
    let mut util = public_class("b/Util");
    let mut twice = code(2, 1, &[
        Instruction::Local(LocalOp::ILoad, 0).into(),
        Instruction::Simple(ICONST_2).into(),
        Instruction::Simple(IMUL).into(),
        Instruction::Simple(IRETURN).into(),
    ]);
    twice.line_numbers = Some(vec![LineNumber {
        start_pc: 0,
        line_number: 5,
        source: None,
    }]);
    let twice = Method::new(MethodAccessFlags::PUBLIC | STATIC, "twice", "(I)I").with_code(twice);
    util.add_method(twice);

    let mut main = public_class("a/Main");
    let twice_ref = main.constants.get_method_ref("b/Util", "twice", "(I)I", false).unwrap();
    let mut body = code(1, 0, &[
        Instruction::BiPush(21).into(),
        Instruction::Constant(INVOKESTATIC, twice_ref).into(),
        Instruction::Simple(IRETURN).into(),
    ]);
    body.line_numbers = Some(vec![LineNumber {
        start_pc: 0,
        line_number: 10,
        source: None,
    }]);
    let main_method = main.add_method(Method::new(STATIC, "main", "()I").with_code(body));

    let mut pool = ClassPool::new();
    pool.add_class(util);
    let main = pool.add_class(main);
    let statistics = optimizer(RuntimeProfile::Standard).optimize(&mut pool).unwrap();
    assert_eq!(statistics.inlined, 1);
    assert_eq!(statistics.linearized, 1);

    // 0: bipush 21, 2: istore_0, 3: iload_0, 4: iconst_2, 5: imul, 6: ireturn
    let main_method = MethodId { class: main, index: main_method };
    let rewritten = pool.method(main_method).code.as_ref().unwrap();
    let source = LineSource {
        class_name: "b/Util".to_owned(),
        method_name: "twice".to_owned(),
        descriptor: "(I)I".to_owned(),
    };
    assert_eq!(
        rewritten.line_numbers.as_deref(),
        Some(
            &[
                LineNumber {
                    start_pc: 0,
                    line_number: 10,
                    source: None,
                },
                LineNumber {
                    start_pc: 3,
                    line_number: 16,
                    source: Some(source),
                },
                LineNumber {
                    start_pc: 6,
                    line_number: 10,
                    source: None,
                },
            ][..]
        )
    );
}

#[test]
fn malformed_method_is_left_alone() {
    init_logging();
    let mut class = public_class("a/Broken");
    let broken = CodeAttribute::new(1, 1, vec![0xff, RETURN]);
    let broken = class.add_method(Method::new(STATIC, "broken", "()V").with_code(broken));
    let fine = code(1, 2, &[
        Instruction::Simple(ICONST_0).into(),
        Instruction::Local(LocalOp::IStore, 1).into(),
        Instruction::Simple(RETURN).into(),
    ]);
    let fine = class.add_method(Method::new(STATIC, "fine", "()V").with_code(fine));
    let mut pool = ClassPool::new();
    let class = pool.add_class(class);

    let statistics = optimizer(RuntimeProfile::Standard).optimize(&mut pool).unwrap();
    assert_eq!(statistics.skipped_methods, 1);
    assert_eq!(statistics.shrunk, 1);
    let broken = pool.method(MethodId { class, index: broken }).code.as_ref().unwrap();
    assert_eq!(broken.code, vec![0xff, RETURN]);
    let fine = pool.method(MethodId { class, index: fine }).code.as_ref().unwrap();
    assert_eq!(fine.max_locals, 1);
}

#[test]
fn dangling_constant_only_skips_its_method() {
    init_logging();
    let mut bad = public_class("a/Bad");
    let dangling = code(0, 0, &[
        Instruction::Constant(INVOKESTATIC, ConstantIndex(999)).into(),
        Instruction::Simple(RETURN).into(),
    ]);
    let m = bad.add_method(Method::new(STATIC, "m", "()V").with_code(dangling));

    let mut good = public_class("a/Good");
    let f = code(1, 1, &[
        Instruction::Local(LocalOp::ILoad, 0).into(),
        Instruction::Simple(IRETURN).into(),
    ]);
    good.add_method(Method::new(STATIC, "f", "(I)I").with_code(f));
    let f_ref = good.constants.get_method_ref("a/Good", "f", "(I)I", false).unwrap();
    let g = code(1, 0, &[
        Instruction::Simple(ICONST_3).into(),
        Instruction::Constant(INVOKESTATIC, f_ref).into(),
        Instruction::Simple(POP).into(),
        Instruction::Simple(RETURN).into(),
    ]);
    let g = good.add_method(Method::new(STATIC, "g", "()V").with_code(g));

    let mut pool = ClassPool::new();
    let bad = pool.add_class(bad);
    let good = pool.add_class(good);
    let m = MethodId { class: bad, index: m };
    let g = MethodId { class: good, index: g };
    let m_before = pool.method(m).code.clone();

    let statistics = optimizer(RuntimeProfile::Standard).optimize(&mut pool).unwrap();
    assert_eq!(statistics.skipped_methods, 1);
    assert_eq!(statistics.inlined, 1);
    assert_eq!(pool.method(m).code, m_before);

    // iconst_3, istore_0, iload_0, pop, return
    let g_code = pool.method(g).code.as_ref().unwrap();
    assert_eq!(g_code.code, vec![ICONST_3, ISTORE_0, ILOAD_0, POP, RETURN]);
}
