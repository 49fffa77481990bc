use reedvm::{Config, Error, LinkErrorKind, Loader, ValType, Value, Vm};

const MATH_WAT: &str = r#"(module
    (global (export "answer") i32 (i32.const 42))
    (memory (export "mem") 1 4)
    (func (export "mul") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        i32.mul))"#;

fn register_math(vm: &mut Vm) -> anyhow::Result<()> {
    let module = Loader::new(vm.config()).parse_wat(MATH_WAT)?;
    vm.register_module_from_module("math", module)?;
    Ok(())
}

#[test_log::test]
fn registered_modules_are_callable_by_name() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;
    register_math(&mut vm)?;

    let results = vm.execute_registered("math", "mul", &[Value::I32(6), Value::I32(7)])?;
    assert_eq!(results, vec![Value::I32(42)]);
    Ok(())
}

#[test_log::test]
fn modules_link_against_registered_exports() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;
    register_math(&mut vm)?;

    vm.load_from_wat(
        r#"(module
            (import "math" "mul" (func $mul (param i32 i32) (result i32)))
            (import "math" "answer" (global $answer i32))
            (func (export "answer_squared") (result i32)
                global.get $answer
                global.get $answer
                call $mul))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;
    assert_eq!(vm.execute("answer_squared", &[])?, vec![Value::I32(1764)]);
    Ok(())
}

#[test_log::test]
fn imports_with_wrong_types_fail_to_link() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;
    register_math(&mut vm)?;

    // Wrong function signature.
    vm.load_from_wat(
        r#"(module
            (import "math" "mul" (func (param i64 i64) (result i64))))"#,
    )?;
    vm.validate()?;
    let err = vm.instantiate().unwrap_err();
    assert!(matches!(
        err,
        Error::Link {
            kind: LinkErrorKind::IncompatibleImportType,
            ..
        }
    ));

    // Memory limits not satisfied: the exported memory is (1, max 4) but
    // the import declares a larger minimum.
    vm.load_from_wat(r#"(module (import "math" "mem" (memory 2 4)))"#)?;
    vm.validate()?;
    let err = vm.instantiate().unwrap_err();
    assert!(matches!(
        err,
        Error::Link {
            kind: LinkErrorKind::IncompatibleImportType,
            ..
        }
    ));

    // Unknown module entirely.
    vm.load_from_wat(r#"(module (import "nowhere" "f" (func)))"#)?;
    vm.validate()?;
    let err = vm.instantiate().unwrap_err();
    assert!(matches!(
        err,
        Error::Link {
            kind: LinkErrorKind::UnknownImport,
            ..
        }
    ));
    Ok(())
}

#[test_log::test]
fn duplicate_registration_is_a_name_conflict() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;
    register_math(&mut vm)?;

    let module = Loader::new(vm.config()).parse_wat(MATH_WAT)?;
    let err = vm.register_module_from_module("math", module).unwrap_err();
    assert!(matches!(err, Error::ModuleNameConflict(_)));
    Ok(())
}

#[test_log::test]
fn out_of_bounds_active_segment_rolls_back() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;
    vm.load_from_wat(
        r#"(module
            (memory 1)
            (data (i32.const 65533) "abcd"))"#,
    )?;
    vm.validate()?;
    let err = vm.instantiate().unwrap_err();
    assert!(matches!(
        err,
        Error::Link {
            kind: LinkErrorKind::OutOfBoundsInit,
            ..
        }
    ));
    // Nothing leaked into the store.
    assert!(vm.store().active_module().is_none());
    assert!(vm.store().function_exports().is_empty());
    Ok(())
}

#[test_log::test]
fn wrong_workflow_order_is_rejected() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;

    assert!(matches!(vm.validate().unwrap_err(), Error::WrongVmWorkflow));
    assert!(matches!(vm.instantiate().unwrap_err(), Error::WrongVmWorkflow));
    assert!(matches!(
        vm.execute("f", &[]).unwrap_err(),
        Error::WrongVmWorkflow
    ));

    vm.load_from_wat(r#"(module (func (export "f")))"#)?;
    // Skipping validation is not allowed.
    assert!(matches!(vm.instantiate().unwrap_err(), Error::WrongVmWorkflow));
    vm.validate()?;
    // Validating twice is not allowed either.
    assert!(matches!(vm.validate().unwrap_err(), Error::WrongVmWorkflow));
    vm.instantiate()?;
    vm.execute("f", &[])?;

    // Loading anew resets the machine to Loaded from any state.
    vm.load_from_wat(r#"(module (func (export "g")))"#)?;
    assert!(matches!(
        vm.execute("g", &[]).unwrap_err(),
        Error::WrongVmWorkflow
    ));
    vm.validate()?;
    vm.instantiate()?;
    vm.execute("g", &[])?;

    vm.cleanup();
    assert!(matches!(vm.validate().unwrap_err(), Error::WrongVmWorkflow));
    Ok(())
}

#[test_log::test]
fn cleanup_keeps_registered_modules() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;
    register_math(&mut vm)?;

    vm.load_from_wat(r#"(module (func (export "f") (result i32) (i32.const 1)))"#)?;
    vm.validate()?;
    vm.instantiate()?;
    assert_eq!(vm.function_list().len(), 1);

    vm.cleanup();
    assert!(vm.function_list().is_empty());
    assert_eq!(vm.statistics().instr_count(), 0);
    // Registered modules survive.
    let results = vm.execute_registered("math", "mul", &[Value::I32(2), Value::I32(3)])?;
    assert_eq!(results, vec![Value::I32(6)]);
    Ok(())
}

#[test_log::test]
fn function_list_reports_names_and_types() -> anyhow::Result<()> {
    let mut vm = Vm::new(Config::default())?;
    vm.load_from_wat(
        r#"(module
            (func (export "a") (param i32) (result i32) local.get 0)
            (func (export "b") (param f64 f64)))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    let list = vm.function_list();
    assert_eq!(list.len(), 2);
    let a = list.iter().find(|(name, _)| name == "a").unwrap();
    assert_eq!(a.1.params(), &[ValType::I32]);
    assert_eq!(a.1.results(), &[ValType::I32]);
    let b = list.iter().find(|(name, _)| name == "b").unwrap();
    assert_eq!(b.1.params(), &[ValType::F64, ValType::F64]);
    assert!(b.1.results().is_empty());
    Ok(())
}
