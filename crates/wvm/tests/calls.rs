use std::sync::{Arc, Mutex};
use std::thread;

use wvm::{Config, Engine, Error, Module, Trap, Vm, DEFAULT_MAX_CALL_DEPTH};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn instantiate(engine: &Engine, wat: &str) -> Result<Vm, anyhow::Error> {
    let module = Module::new(engine, wat, ())?;
    Ok(Vm::new(engine, Arc::new(module))?)
}

const FIB: &str = r#"
    (module
        (func $fib (export "fib") (param i32) (result i32)
            local.get 0
            i32.const 2
            i32.lt_s
            if (result i32)
                local.get 0
            else
                local.get 0
                i32.const 1
                i32.sub
                call $fib
                local.get 0
                i32.const 2
                i32.sub
                call $fib
                i32.add
            end
        )
    )
"#;

const DISPATCH: &str = r#"
    (module
        (type $binary (func (param i32 i32) (result i32)))
        (type $unary (func (param i32) (result i32)))
        (type $void (func))
        (type $binary_void (func (param i32 i32)))
        (type $binary_wide (func (param i32 i32) (result i64)))
        (global $touched (mut i32) (i32.const 0))
        (table 4 funcref)
        (elem (i32.const 0) $add $mark)
        (elem (i32.const 3) $add_marked)

        (func $add (type $binary)
            local.get 0
            local.get 1
            i32.add
        )
        (func $mark (type $unary)
            i32.const 1
            global.set $touched
            local.get 0
        )
        (func $add_marked (type $binary)
            i32.const 1
            global.set $touched
            local.get 0
            local.get 1
            i32.add
        )

        (func (export "direct") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            call $add
        )
        (func (export "indirect") (param i32 i32 i32) (result i32)
            local.get 0
            local.get 1
            local.get 2
            call_indirect (type $binary)
        )
        (func (export "wrong_type") (param i32) (result i32)
            local.get 0
            local.get 0
            i32.const 1
            call_indirect (type $binary)
        )
        (func (export "no_results")
            i32.const 0
            call_indirect (type $void)
        )
        (func (export "sum_discarded") (param i32 i32 i32)
            local.get 0
            local.get 1
            local.get 2
            call_indirect (type $binary_void)
        )
        (func (export "sum_wide") (param i32 i32 i32) (result i64)
            local.get 0
            local.get 1
            local.get 2
            call_indirect (type $binary_wide)
        )
        (func (export "touched") (result i32)
            global.get $touched
        )
    )
"#;

#[test]
fn direct_and_indirect_calls_agree() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, DISPATCH)?;
    assert_eq!(vm.invoke("direct", &[2, 3])?, Some(5));
    assert_eq!(vm.invoke("indirect", &[2, 3, 0])?, Some(5));
    assert_eq!(vm.invoke("indirect", &[40, 2, 0])?, vm.invoke("direct", &[40, 2])?);
    Ok(())
}

#[test]
fn signature_mismatch_never_enters_the_target() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, DISPATCH)?;

    let err = vm.invoke("wrong_type", &[9]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(Trap::SignatureMismatch {
            type_index: 0,
            func_index: 1
        })
    ));
    assert_eq!(vm.invoke("touched", &[])?, Some(0));
    assert_eq!(vm.depth(), 0);
    Ok(())
}

#[test]
fn indirect_call_with_wrong_result_arity_aborts() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, DISPATCH)?;

    let err = vm.invoke("no_results", &[]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(Trap::SignatureMismatch {
            type_index: 2,
            func_index: 0
        })
    ));
    Ok(())
}

#[test]
fn matching_params_with_other_results_are_mismatches() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, DISPATCH)?;

    let err = vm.invoke("sum_discarded", &[2, 3, 0]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(Trap::SignatureMismatch {
            type_index: 3,
            func_index: 0
        })
    ));

    let err = vm.invoke("sum_discarded", &[2, 3, 3]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(Trap::SignatureMismatch {
            type_index: 3,
            func_index: 2
        })
    ));
    let err = vm.invoke("sum_wide", &[2, 3, 3]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(Trap::SignatureMismatch {
            type_index: 4,
            func_index: 2
        })
    ));
    assert_eq!(vm.invoke("touched", &[])?, Some(0));
    assert_eq!(vm.depth(), 0);

    assert_eq!(vm.invoke("indirect", &[2, 3, 3])?, Some(5));
    assert_eq!(vm.invoke("touched", &[])?, Some(1));
    Ok(())
}

#[test]
fn table_slots_are_checked() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, DISPATCH)?;

    let err = vm.invoke("indirect", &[1, 2, 2]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(Trap::UninitializedElement { table: 0, index: 2 })
    ));

    let err = vm.invoke("indirect", &[1, 2, 7]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(Trap::UndefinedElement { table: 0, index: 7 })
    ));
    Ok(())
}

#[test]
fn recursion() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, FIB)?;
    assert_eq!(vm.invoke("fib", &[0])?, Some(0));
    assert_eq!(vm.invoke("fib", &[1])?, Some(1));
    assert_eq!(vm.invoke("fib", &[10])?, Some(55));
    assert_eq!(vm.invoke("fib", &[15])?, Some(610));
    assert_eq!(vm.depth(), 0);
    Ok(())
}

#[test]
fn hook_sees_arguments_in_declaration_order() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(
        &engine,
        r#"
        (module
            (func $callee (param i32 i32 i32) (result i32)
                local.get 0
            )
            (func (export "outer") (result i32)
                i32.const 1
                i32.const 2
                i32.const 3
                call $callee
            )
        )
    "#,
    )?;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    vm.on_call(move |info| {
        seen.lock().unwrap().push((
            info.index,
            info.name.map(String::from),
            info.depth,
            info.locals.to_vec(),
        ));
    });

    assert_eq!(vm.invoke("outer", &[])?, Some(1));
    let calls = calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![
            (1, None, 1, vec![]),
            (0, Some("callee".to_string()), 2, vec![1, 2, 3]),
        ]
    );
    Ok(())
}

#[test]
fn depth_grows_by_one_per_call() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, FIB)?;

    let depths = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&depths);
    vm.on_call(move |info| seen.lock().unwrap().push(info.depth));

    vm.invoke("fib", &[3])?;
    let depths = depths.lock().unwrap();
    // fib(3) -> fib(2) -> fib(1), fib(0); fib(1)
    assert_eq!(*depths, vec![1, 2, 3, 3, 2]);
    assert_eq!(vm.depth(), 0);
    Ok(())
}

#[test]
fn call_stack_exhaustion_unwinds_cleanly() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::new(Config::new().max_call_depth(32));
    let mut vm = instantiate(
        &engine,
        r#"
        (module
            (func $forever (export "forever") (param i32) (result i32)
                local.get 0
                i32.const 1
                i32.add
                call $forever
            )
            (func (export "ok") (result i32)
                i32.const 7
            )
        )
    "#,
    )?;

    let err = vm.invoke("forever", &[0]).unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::CallStackExhausted)));
    assert_eq!(vm.depth(), 0);
    assert!(vm.backtrace().is_empty());
    assert_eq!(vm.last_backtrace().len(), 32);
    assert!(vm.last_backtrace().iter().all(|&f| f == 0));

    assert_eq!(vm.invoke("ok", &[])?, Some(7));
    Ok(())
}

const COUNTDOWN: &str = r#"
    (module
        (func $count (export "count") (param i32) (result i32)
            local.get 0
            i32.eqz
            if (result i32)
                i32.const 0
            else
                local.get 0
                i32.const 1
                i32.sub
                call $count
                i32.const 1
                i32.add
            end
        )
    )
"#;

#[test]
fn default_call_depth_fits_a_small_native_stack() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let module = Arc::new(Module::new(&engine, COUNTDOWN, ())?);

    let handle = thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(move || -> Result<_, Error> {
            let mut vm = Vm::new(&engine, module)?;
            let deepest = vm.invoke("count", &[DEFAULT_MAX_CALL_DEPTH as u64 - 1]);
            let too_deep = vm.invoke("count", &[DEFAULT_MAX_CALL_DEPTH as u64]);
            Ok((deepest, too_deep, vm.depth()))
        })?;
    let (deepest, too_deep, depth) = handle.join().expect("thread panicked")?;

    assert_eq!(deepest?, Some(DEFAULT_MAX_CALL_DEPTH as u64 - 1));
    assert!(matches!(
        too_deep,
        Err(Error::Trap(Trap::CallStackExhausted))
    ));
    assert_eq!(depth, 0);
    Ok(())
}

#[test]
fn last_backtrace_names_the_trapping_chain() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(
        &engine,
        r#"
        (module
            (func $boom
                unreachable
            )
            (func $middle
                call $boom
            )
            (func (export "run")
                call $middle
            )
        )
    "#,
    )?;

    let err = vm.invoke("run", &[]).unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::Unreachable)));
    assert_eq!(vm.last_backtrace(), &[2, 1, 0]);
    assert_eq!(vm.depth(), 0);
    Ok(())
}

#[test]
fn native_blocks_match_the_interpreter() -> Result<(), anyhow::Error> {
    init_logger();
    let wat = r#"
        (module
            (func (export "sum") (param $n i32) (result i32)
                (local $acc i32)
                block
                    loop
                        local.get $n
                        i32.eqz
                        br_if 1
                        local.get $acc
                        local.get $n
                        i32.add
                        local.set $acc
                        local.get $n
                        i32.const 1
                        i32.sub
                        local.set $n
                        br 0
                    end
                end
                local.get $acc
            )
            (func (export "poly") (param i64) (result i64)
                local.get 0
                local.get 0
                i64.mul
                i64.const 3
                i64.add
                local.get 0
                i64.sub
            )
        )
    "#;

    let plain = Engine::new(Config::new().native_blocks(false));
    let native = Engine::new(Config::new().native_blocks(true).native_min_ops(2));
    let mut a = instantiate(&plain, wat)?;
    let mut b = instantiate(&native, wat)?;

    for n in [0, 1, 10, 100] {
        assert_eq!(a.invoke("sum", &[n])?, b.invoke("sum", &[n])?);
    }
    assert_eq!(b.invoke("sum", &[10])?, Some(55));
    for x in [0, 2, 1_000] {
        assert_eq!(a.invoke("poly", &[x])?, b.invoke("poly", &[x])?);
    }
    assert_eq!(b.invoke("poly", &[4])?, Some(15));
    Ok(())
}

#[test]
fn start_function_runs_on_instantiation() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let vm = instantiate(
        &engine,
        r#"
        (module
            (global (mut i32) (i32.const 0))
            (func $init
                i32.const 7
                global.set 0
            )
            (start $init)
        )
    "#,
    )?;
    assert_eq!(vm.global(0), Some(7));
    Ok(())
}

#[test]
fn invoke_checks_the_export_and_arguments() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::default();
    let mut vm = instantiate(&engine, DISPATCH)?;

    let err = vm.invoke("missing", &[]).unwrap_err();
    assert!(matches!(err, Error::ExportNotFound(name) if name == "missing"));

    let err = vm.invoke("direct", &[1]).unwrap_err();
    assert!(matches!(
        err,
        Error::ArgumentCount {
            expected: 2,
            got: 1
        }
    ));
    Ok(())
}

#[test]
fn modules_are_shared_across_threads() -> Result<(), anyhow::Error> {
    init_logger();
    let engine = Engine::new(Config::new().native_blocks(true));
    let module = Arc::new(Module::new(&engine, FIB, ())?);

    let handles: Vec<_> = (0..4u64)
        .map(|i| {
            let engine = engine.clone();
            let module = Arc::clone(&module);
            thread::spawn(move || -> Result<Option<u64>, Error> {
                let mut vm = Vm::new(&engine, module)?;
                vm.invoke("fib", &[10 + i])
            })
        })
        .collect();

    let results = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(results, vec![Some(55), Some(89), Some(144), Some(233)]);
    Ok(())
}
