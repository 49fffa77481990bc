use reedvm::{code_is_ok, Config, HostRegistration, Value, Vm};

fn wasi_vm() -> anyhow::Result<Vm> {
    let mut config = Config::default();
    config.add_host_registration(HostRegistration::Wasi);
    Ok(Vm::new(config)?)
}

#[test_log::test]
fn proc_exit_terminates_but_counts_as_ok() -> anyhow::Result<()> {
    let mut vm = wasi_vm()?;
    vm.load_from_wat(
        r#"(module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (memory 1)
            (func (export "_start")
                (call $exit (i32.const 0))
                (unreachable)))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    let err = vm.execute("_start", &[]).unwrap_err();
    assert!(err.is_cooperative_exit());
    assert!(code_is_ok(err.code()));
    assert_eq!(vm.wasi_module().unwrap().exit_code(), 0);
    Ok(())
}

#[test_log::test]
fn proc_exit_code_is_observable() -> anyhow::Result<()> {
    let mut vm = wasi_vm()?;
    vm.load_from_wat(
        r#"(module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (memory 1)
            (func (export "_start")
                (call $exit (i32.const 17))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    let err = vm.execute("_start", &[]).unwrap_err();
    assert!(err.is_cooperative_exit());
    assert_eq!(vm.wasi_module().unwrap().exit_code(), 17);
    Ok(())
}

#[test_log::test]
fn args_are_visible_through_the_wasi_abi() -> anyhow::Result<()> {
    let mut vm = wasi_vm()?;
    vm.init_wasi(&["prog", "--flag", "input.txt"], &["HOME=/tmp"], &[], &[])?;

    vm.load_from_wat(
        r#"(module
            (import "wasi_snapshot_preview1" "args_sizes_get"
                (func $args_sizes (param i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "args_get"
                (func $args_get (param i32 i32) (result i32)))
            (memory 1)
            (func (export "argc") (result i32)
                (drop (call $args_sizes (i32.const 0) (i32.const 4)))
                (i32.load (i32.const 0)))
            (func (export "argv_buf_size") (result i32)
                (drop (call $args_sizes (i32.const 0) (i32.const 4)))
                (i32.load (i32.const 4)))
            (func (export "first_arg_byte") (result i32)
                (drop (call $args_sizes (i32.const 0) (i32.const 4)))
                (drop (call $args_get (i32.const 16) (i32.const 64)))
                (i32.load8_u (i32.const 64))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    assert_eq!(vm.execute("argc", &[])?, vec![Value::I32(3)]);
    // "prog\0--flag\0input.txt\0"
    assert_eq!(vm.execute("argv_buf_size", &[])?, vec![Value::I32(22)]);
    assert_eq!(vm.execute("first_arg_byte", &[])?, vec![Value::I32(b'p' as i32)]);
    Ok(())
}

#[test_log::test]
fn random_get_fills_guest_memory() -> anyhow::Result<()> {
    let mut vm = wasi_vm()?;
    vm.load_from_wat(
        r#"(module
            (import "wasi_snapshot_preview1" "random_get"
                (func $random (param i32 i32) (result i32)))
            (memory 1)
            (func (export "roll") (result i32)
                (local $i i32)
                (local $acc i32)
                (drop (call $random (i32.const 0) (i32.const 64)))
                (block $done
                    (loop $next
                        (br_if $done (i32.ge_u (local.get $i) (i32.const 64)))
                        (local.set $acc
                            (i32.or (local.get $acc) (i32.load8_u (local.get $i))))
                        (local.set $i (i32.add (local.get $i) (i32.const 1)))
                        (br $next)))
                (local.get $acc)))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    // 64 random bytes being all zero is vanishingly unlikely.
    let results = vm.execute("roll", &[])?;
    assert_ne!(results, vec![Value::I32(0)]);
    Ok(())
}

#[test_log::test]
fn clock_time_get_is_monotone() -> anyhow::Result<()> {
    let mut vm = wasi_vm()?;
    vm.load_from_wat(
        r#"(module
            (import "wasi_snapshot_preview1" "clock_time_get"
                (func $clock (param i32 i64 i32) (result i32)))
            (memory 1)
            (func (export "now") (result i64)
                (drop (call $clock (i32.const 1) (i64.const 0) (i32.const 0)))
                (i64.load (i32.const 0))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    let first = vm.execute("now", &[])?[0].unwrap_i64();
    let second = vm.execute("now", &[])?[0].unwrap_i64();
    assert!(second >= first);
    Ok(())
}

#[test_log::test]
fn preopened_files_can_be_read() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join("reedvm-wasi-test");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("greeting.txt"), b"hello")?;

    let mut vm = wasi_vm()?;
    let mapping = format!("/data:{}", dir.display());
    vm.init_wasi(&[], &[], &[mapping.as_str()], &[])?;

    vm.load_from_wat(
        r#"(module
            (import "wasi_snapshot_preview1" "path_open"
                (func $open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "fd_read"
                (func $read (param i32 i32 i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "fd_close"
                (func $close (param i32) (result i32)))
            (memory 1)
            ;; the guest path to open
            (data (i32.const 0) "greeting.txt")
            (func (export "read_first_byte") (result i32)
                (local $fd i32)
                ;; open preopen fd 3, path at [0, 12), rights = fd_read
                (drop (call $open
                    (i32.const 3) (i32.const 0)
                    (i32.const 0) (i32.const 12)
                    (i32.const 0)
                    (i64.const 2) (i64.const 0)
                    (i32.const 0)
                    (i32.const 100)))
                (local.set $fd (i32.load (i32.const 100)))
                ;; one iovec at 112: base 128, len 16
                (i32.store (i32.const 112) (i32.const 128))
                (i32.store (i32.const 116) (i32.const 16))
                (drop (call $read
                    (local.get $fd) (i32.const 112) (i32.const 1) (i32.const 120)))
                (drop (call $close (local.get $fd)))
                (i32.load8_u (i32.const 128))))"#,
    )?;
    vm.validate()?;
    vm.instantiate()?;

    assert_eq!(
        vm.execute("read_first_byte", &[])?,
        vec![Value::I32(b'h' as i32)]
    );
    Ok(())
}
