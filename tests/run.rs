use reedvm::ast::COST_TABLE_LEN;
use reedvm::{
    Config, Error, FuncType, HostContext, ImportObject, Trap, ValType, Value, Vm,
};

fn new_vm() -> anyhow::Result<Vm> {
    Ok(Vm::new(Config::default())?)
}

#[test_log::test]
fn add_with_wrapping() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    assert_eq!(
        vm.execute("add", &[Value::I32(3), Value::I32(4)])?,
        vec![Value::I32(7)]
    );
    assert_eq!(
        vm.execute("add", &[Value::I32(-1), Value::I32(1)])?,
        vec![Value::I32(0)]
    );
    assert_eq!(
        vm.execute("add", &[Value::I32(0x7FFF_FFFF), Value::I32(1)])?,
        vec![Value::I32(-2147483648)]
    );
    // With no cost table installed every instruction costs 1.
    assert_eq!(vm.statistics().instr_count(), vm.statistics().total_cost());
    assert!(vm.statistics().instr_count() > 0);
    Ok(())
}

#[test_log::test]
fn division_by_zero_traps_and_meters() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module
            (func (export "divz") (param i32) (result i32)
                i32.const 100
                local.get 0
                i32.div_s))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    let err = vm.execute("divz", &[Value::I32(0)]).unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::IntegerDivideByZero)));
    assert!(vm.statistics().total_cost() > 0);

    // The trap unwound the invocation but not the instance.
    assert_eq!(
        vm.execute("divz", &[Value::I32(4)])?,
        vec![Value::I32(25)]
    );
    Ok(())
}

#[test_log::test]
fn memory_store_load_and_out_of_bounds() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module
            (memory 1)
            (func (export "store_load") (param i32) (result i32)
                i32.const 0
                local.get 0
                i32.store
                i32.const 0
                i32.load)
            (func (export "store_at") (param i32 i32)
                local.get 0
                local.get 1
                i32.store))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    assert_eq!(
        vm.execute("store_load", &[Value::I32(42)])?,
        vec![Value::I32(42)]
    );
    let err = vm
        .execute("store_at", &[Value::I32(65536), Value::I32(1)])
        .unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::MemoryOutOfBounds)));
    Ok(())
}

#[test_log::test]
fn host_import_is_linked_and_called() -> anyhow::Result<()> {
    let mut vm = new_vm()?;

    let mut import = ImportObject::new("env");
    import.add_func(
        "mul",
        FuncType::new([ValType::I32, ValType::I32], [ValType::I32]),
        |_cx: &mut HostContext<'_>, args: &[Value]| {
            let a = args[0].unwrap_i32();
            let b = args[1].unwrap_i32();
            Ok(vec![Value::I32(a.wrapping_mul(b))])
        },
    );
    vm.register_import_object(import)?;

    let results = vm.run_wasm_from_bytes(
        &wat::parse_str(
            r#"(module
                (import "env" "mul" (func $mul (param i32 i32) (result i32)))
                (func (export "double") (param i32) (result i32)
                    local.get 0
                    i32.const 2
                    call $mul))"#,
        )?,
        "double",
        &[Value::I32(21)],
    )?;
    assert_eq!(results, vec![Value::I32(42)]);
    Ok(())
}

#[test_log::test]
fn host_function_can_reenter_the_interpreter() -> anyhow::Result<()> {
    let mut vm = new_vm()?;

    let mut import = ImportObject::new("env");
    import.add_func(
        "apply_add",
        FuncType::new([ValType::I32, ValType::I32], [ValType::I32]),
        |cx: &mut HostContext<'_>, args: &[Value]| {
            let (_, add) = cx
                .store()
                .function_exports()
                .into_iter()
                .find(|(name, _)| name == "add")
                .expect("anonymous module exports add");
            let results = cx.invoke(add, &[args[0], args[1]])?;
            Ok(results)
        },
    );
    vm.register_import_object(import)?;

    let results = vm.run_wasm_from_bytes(
        &wat::parse_str(
            r#"(module
                (import "env" "apply_add" (func $apply (param i32 i32) (result i32)))
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add)
                (func (export "via_host") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    call $apply))"#,
        )?,
        "via_host",
        &[Value::I32(20), Value::I32(22)],
    )?;
    assert_eq!(results, vec![Value::I32(42)]);
    Ok(())
}

#[test_log::test]
fn cost_limit_traps_before_the_loop_finishes() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.statistics_mut().set_cost_table(&vec![1; COST_TABLE_LEN]);
    vm.statistics_mut().set_cost_limit(100);

    vm.load_from_wat(
        r#"(module
            (func (export "spin")
                (local $i i32)
                (block $exit
                    (loop $continue
                        (br_if $exit (i32.ge_u (local.get $i) (i32.const 1000)))
                        (local.set $i (i32.add (local.get $i) (i32.const 1)))
                        (br $continue)))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    let err = vm.execute("spin", &[]).unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::CostLimitExceeded)));
    assert!(vm.statistics().instr_count() <= 100);
    assert!(vm.statistics().total_cost() <= 100);
    Ok(())
}

#[test_log::test]
fn call_indirect_null_and_mismatch() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module
            (type $ii (func (param i32) (result i32)))
            (type $void (func))
            (table 3 funcref)
            (func $id (type $ii) local.get 0)
            (func $nop (type $void))
            (elem (i32.const 0) $id $nop)
            (func (export "call_id") (param i32) (result i32)
                (call_indirect (type $ii) (local.get 0) (i32.const 0)))
            (func (export "call_mismatch") (result i32)
                (call_indirect (type $ii) (i32.const 7) (i32.const 1)))
            (func (export "call_null") (result i32)
                (call_indirect (type $ii) (i32.const 7) (i32.const 2))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    assert_eq!(
        vm.execute("call_id", &[Value::I32(9)])?,
        vec![Value::I32(9)]
    );
    let err = vm.execute("call_mismatch", &[]).unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::IndirectCallTypeMismatch)));
    let err = vm.execute("call_null", &[]).unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::UndefinedElement)));
    Ok(())
}

#[test_log::test]
fn globals_and_control_flow() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module
            (global $sum (mut i32) (i32.const 0))
            (func (export "accumulate") (param i32) (result i32)
                global.get $sum
                local.get 0
                i32.add
                global.set $sum
                global.get $sum)
            (func (export "fib") (param i32) (result i32)
                (if (result i32) (i32.lt_u (local.get 0) (i32.const 2))
                    (then (local.get 0))
                    (else
                        (i32.add
                            (call 1 (i32.sub (local.get 0) (i32.const 1)))
                            (call 1 (i32.sub (local.get 0) (i32.const 2))))))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    assert_eq!(vm.execute("accumulate", &[Value::I32(5)])?, vec![Value::I32(5)]);
    assert_eq!(vm.execute("accumulate", &[Value::I32(7)])?, vec![Value::I32(12)]);
    assert_eq!(vm.execute("fib", &[Value::I32(10)])?, vec![Value::I32(55)]);
    Ok(())
}

#[test_log::test]
fn start_function_runs_at_instantiation() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module
            (memory 1)
            (func $init (i32.store (i32.const 0) (i32.const 99)))
            (start $init)
            (func (export "peek") (result i32) (i32.load (i32.const 0))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;
    assert_eq!(vm.execute("peek", &[])?, vec![Value::I32(99)]);
    Ok(())
}

#[test_log::test]
fn bulk_memory_and_reference_ops() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module
            (memory 1)
            (data (i32.const 16) "abcd")
            (table $t 4 funcref)
            (func (export "copy_then_load") (result i32)
                (memory.copy (i32.const 0) (i32.const 16) (i32.const 4))
                (i32.load (i32.const 0)))
            (func (export "fill_then_load") (result i32)
                (memory.fill (i32.const 32) (i32.const 0x5A) (i32.const 4))
                (i32.load (i32.const 32)))
            (func (export "grow_table") (result i32)
                (table.grow $t (ref.null func) (i32.const 2)))
            (func (export "slot_is_null") (param i32) (result i32)
                (ref.is_null (table.get $t (local.get 0)))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    assert_eq!(
        vm.execute("copy_then_load", &[])?,
        vec![Value::I32(i32::from_le_bytes(*b"abcd"))]
    );
    assert_eq!(
        vm.execute("fill_then_load", &[])?,
        vec![Value::I32(0x5A5A_5A5A)]
    );
    assert_eq!(vm.execute("grow_table", &[])?, vec![Value::I32(4)]);
    assert_eq!(vm.execute("slot_is_null", &[Value::I32(5)])?, vec![Value::I32(1)]);
    Ok(())
}

#[test_log::test]
fn function_sig_mismatch_is_rejected_up_front() -> anyhow::Result<()> {
    let mut vm = new_vm()?;
    vm.load_from_wat(
        r#"(module (func (export "one") (param i64) (result i64) local.get 0))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    let err = vm.execute("one", &[Value::I32(1)]).unwrap_err();
    assert!(matches!(err, Error::FuncSigMismatch));
    let err = vm.execute("one", &[]).unwrap_err();
    assert!(matches!(err, Error::FuncSigMismatch));
    let err = vm.execute("missing", &[]).unwrap_err();
    assert!(matches!(err, Error::FuncNotFound { .. }));
    Ok(())
}
