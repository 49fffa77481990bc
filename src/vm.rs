//! The VM facade: one- and many-shot orchestration of the
//! loader → validator → instantiator → interpreter pipeline over an owned
//! store, with an explicit workflow state machine.

use crate::ast;
use crate::config::{Config, HostRegistration};
use crate::errors::Error;
use crate::import::ImportObject;
use crate::interpreter::Interpreter;
use crate::loader::Loader;
use crate::statistics::Statistics;
use crate::store::Store;
use crate::types::{FuncType, ValType};
use crate::validator::Validator;
use crate::values::Value;
use crate::wasi::WasiModule;
use log::debug;
use std::path::Path;

/// Where the staged workflow currently stands. `load*` is legal in any
/// state; the other stages must be reached in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    Loaded,
    Validated,
    Instantiated,
}

/// A virtual machine context: configuration snapshot, store, statistics,
/// and the host modules selected by the configuration.
pub struct Vm {
    config: Config,
    loader: Loader,
    validator: Validator,
    interpreter: Interpreter,
    store: Store,
    stats: Statistics,
    wasi: Option<WasiModule>,
    loaded: Option<ast::Module>,
    stage: Stage,
}

impl Vm {
    /// Create a VM with an embedded store, pre-registering the host
    /// modules enabled in `config`.
    pub fn new(config: Config) -> crate::Result<Self> {
        Self::with_store(config, Store::new())
    }

    /// Create a VM over a store the embedder built (and possibly
    /// pre-populated). The VM owns it from here; [`Vm::into_store`] gives
    /// it back.
    pub fn with_store(config: Config, store: Store) -> crate::Result<Self> {
        let mut vm = Self {
            loader: Loader::new(&config),
            validator: Validator::new(&config),
            interpreter: Interpreter::new(&config),
            config,
            store,
            stats: Statistics::new(),
            wasi: None,
            loaded: None,
            stage: Stage::Empty,
        };
        if vm.config.has_host_registration(HostRegistration::Wasi) {
            let wasi = WasiModule::create(&[], &[], &[], &[]);
            vm.interpreter
                .register_import(&mut vm.store, wasi.import_object())?;
            vm.wasi = Some(wasi);
        }
        if vm.config.has_host_registration(HostRegistration::ProcessEnv) {
            let import = process_env_module();
            vm.interpreter.register_import(&mut vm.store, import)?;
        }
        Ok(vm)
    }

    /// (Re-)initialize the WASI context with real arguments, environment,
    /// directory mappings and preopens. The registered host functions
    /// share the context, so this works before or between instantiations.
    pub fn init_wasi(
        &mut self,
        args: &[&str],
        envs: &[&str],
        dirs: &[&str],
        preopens: &[&str],
    ) -> crate::Result<()> {
        match &self.wasi {
            Some(wasi) => wasi.init(args, envs, dirs, preopens),
            None => {
                let wasi = WasiModule::create(args, envs, dirs, preopens);
                self.interpreter
                    .register_import(&mut self.store, wasi.import_object())?;
                self.wasi = Some(wasi);
            }
        }
        Ok(())
    }

    // One-shot operations.

    /// load + validate + instantiate + invoke in one call.
    pub fn run_wasm_from_file(
        &mut self,
        path: impl AsRef<Path>,
        func: &str,
        args: &[Value],
    ) -> crate::Result<Vec<Value>> {
        self.load_from_file(path)?;
        self.run_loaded(func, args)
    }

    pub fn run_wasm_from_bytes(
        &mut self,
        bytes: &[u8],
        func: &str,
        args: &[Value],
    ) -> crate::Result<Vec<Value>> {
        self.load_from_bytes(bytes)?;
        self.run_loaded(func, args)
    }

    pub fn run_wasm_from_module(
        &mut self,
        module: ast::Module,
        func: &str,
        args: &[Value],
    ) -> crate::Result<Vec<Value>> {
        self.load_from_module(module)?;
        self.run_loaded(func, args)
    }

    fn run_loaded(&mut self, func: &str, args: &[Value]) -> crate::Result<Vec<Value>> {
        self.validate()?;
        self.instantiate()?;
        self.execute(func, args)
    }

    // Registration.

    /// Load, validate and instantiate a module under a name; it survives
    /// [`Vm::cleanup`].
    pub fn register_module_from_file(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> crate::Result<()> {
        let module = self.loader.parse_file(path)?;
        self.register_module_from_module(name, module)
    }

    pub fn register_module_from_bytes(&mut self, name: &str, bytes: &[u8]) -> crate::Result<()> {
        let module = self.loader.parse_bytes(bytes)?;
        self.register_module_from_module(name, module)
    }

    pub fn register_module_from_module(
        &mut self,
        name: &str,
        module: ast::Module,
    ) -> crate::Result<()> {
        self.validator.validate(&module)?;
        self.interpreter
            .register_module(&mut self.store, &mut self.stats, &module, name)?;
        Ok(())
    }

    /// Move an import object's instances into the store under its module
    /// name.
    pub fn register_import_object(&mut self, import: ImportObject) -> crate::Result<()> {
        self.interpreter.register_import(&mut self.store, import)?;
        Ok(())
    }

    // The staged workflow.

    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> crate::Result<()> {
        let module = self.loader.parse_file(path)?;
        self.load_from_module(module)
    }

    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> crate::Result<()> {
        let module = self.loader.parse_bytes(bytes)?;
        self.load_from_module(module)
    }

    /// Load WebAssembly text through the same pipeline.
    pub fn load_from_wat(&mut self, source: &str) -> crate::Result<()> {
        let module = self.loader.parse_wat(source)?;
        self.load_from_module(module)
    }

    pub fn load_from_module(&mut self, module: ast::Module) -> crate::Result<()> {
        self.loaded = Some(module);
        self.stage = Stage::Loaded;
        Ok(())
    }

    pub fn validate(&mut self) -> crate::Result<()> {
        if self.stage != Stage::Loaded {
            return Err(Error::WrongVmWorkflow);
        }
        let module = self.loaded.as_ref().expect("stage is Loaded");
        self.validator.validate(module)?;
        self.stage = Stage::Validated;
        Ok(())
    }

    pub fn instantiate(&mut self) -> crate::Result<()> {
        if self.stage != Stage::Validated {
            return Err(Error::WrongVmWorkflow);
        }
        let module = self.loaded.as_ref().expect("stage is Validated");
        self.interpreter
            .instantiate(&mut self.store, &mut self.stats, module)?;
        self.stage = Stage::Instantiated;
        Ok(())
    }

    /// Invoke an exported function of the anonymous module.
    pub fn execute(&mut self, func: &str, args: &[Value]) -> crate::Result<Vec<Value>> {
        if self.stage != Stage::Instantiated {
            return Err(Error::WrongVmWorkflow);
        }
        self.interpreter
            .invoke_by_name(&mut self.store, &mut self.stats, func, args)
    }

    /// Invoke an exported function of a registered module; legal in any
    /// workflow state.
    pub fn execute_registered(
        &mut self,
        module: &str,
        func: &str,
        args: &[Value],
    ) -> crate::Result<Vec<Value>> {
        self.interpreter
            .invoke_registered(&mut self.store, &mut self.stats, module, func, args)
    }

    /// Drop the loaded module, clear the statistics, and reset the store
    /// down to its registered instances.
    pub fn cleanup(&mut self) {
        debug!("vm cleanup");
        self.loaded = None;
        self.stats.reset();
        self.store.reset();
        self.stage = Stage::Empty;
    }

    /// Exported functions of the anonymous module with their types.
    pub fn function_list(&self) -> Vec<(String, FuncType)> {
        self.store
            .function_exports()
            .into_iter()
            .filter_map(|(name, addr)| {
                let ty = self.store.get_function(addr)?.ty().clone();
                Some((name, ty))
            })
            .collect()
    }

    // Accessors.

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn into_store(self) -> Store {
        self.store
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn statistics_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    /// The pre-registered WASI module, when the configuration enables it.
    pub fn wasi_module(&self) -> Option<&WasiModule> {
        self.wasi.as_ref()
    }

    /// The store address of a pre-registered host module.
    pub fn host_module(&self, host: HostRegistration) -> Option<crate::ModuleAddr> {
        let name = match host {
            HostRegistration::Wasi => crate::wasi::WASI_MODULE_NAME,
            HostRegistration::ProcessEnv => "process_env",
        };
        self.store.find_module(name)
    }
}

/// The `process_env` host module: exposes the process environment to
/// guests through the same sizes/get pair WASI uses.
fn process_env_module() -> ImportObject {
    use crate::interpreter::HostContext;
    use crate::trap::Trap;

    let vars: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
    let mut import = ImportObject::new("process_env");

    let list = vars.clone();
    import.add_func(
        "env_sizes_get",
        FuncType::new([ValType::I32, ValType::I32], [ValType::I32]),
        move |hc: &mut HostContext<'_>, args: &[Value]| {
            let count = list.len() as u32;
            let size: u32 = list.iter().map(|v| v.len() as u32 + 1).sum();
            let mem = hc.memory().ok_or(Trap::HostFunctionFailed)?;
            mem.store(u64::from(args[0].unwrap_i32() as u32), &count.to_le_bytes())
                .map_err(|_| Trap::MemoryOutOfBounds)?;
            mem.store(u64::from(args[1].unwrap_i32() as u32), &size.to_le_bytes())
                .map_err(|_| Trap::MemoryOutOfBounds)?;
            Ok(vec![Value::I32(0)])
        },
    );

    let list = vars;
    import.add_func(
        "env_get",
        FuncType::new([ValType::I32, ValType::I32], [ValType::I32]),
        move |hc: &mut HostContext<'_>, args: &[Value]| {
            let mem = hc.memory().ok_or(Trap::HostFunctionFailed)?;
            let ptrs = args[0].unwrap_i32() as u32;
            let mut cursor = args[1].unwrap_i32() as u32;
            for (i, var) in list.iter().enumerate() {
                mem.store(u64::from(ptrs) + i as u64 * 4, &cursor.to_le_bytes())
                    .map_err(|_| Trap::MemoryOutOfBounds)?;
                mem.store(u64::from(cursor), var.as_bytes())
                    .map_err(|_| Trap::MemoryOutOfBounds)?;
                mem.store(u64::from(cursor) + var.len() as u64, &[0])
                    .map_err(|_| Trap::MemoryOutOfBounds)?;
                cursor += var.len() as u32 + 1;
            }
            Ok(vec![Value::I32(0)])
        },
    );

    import
}
