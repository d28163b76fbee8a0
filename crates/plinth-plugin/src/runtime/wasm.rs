// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebAssembly plugin modules using wasmtime.
//!
//! Modules are compiled once at import time. Every call creates a fresh
//! [`Store`] with its own fuel budget and epoch deadline, so a runaway module
//! traps instead of stalling the host.
//!
//! Calling convention, all imports under the `plinth` namespace:
//!
//! - `get_input_len() -> i32` and `get_input(ptr)` copy the JSON input into
//!   guest memory.
//! - `set_output(ptr, len)` hands back a JSON result.
//! - `set_status(code)` marks the output as a full response with that status.
//!   A middleware that sets a status short-circuits the request.
//! - `log(level, ptr, len)` forwards a message to `tracing`.
//!
//! Modules export `memory` and a `handle` function (or the export named in
//! the manifest reference). Entry modules may export `activate` and
//! `deactivate`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, info, trace, warn};
use wasmtime::{Caller, Config, Engine, Linker, Memory, Module, Store, Trap};

use plinth_config::model::RuntimeConfig;
use plinth_core::manifest::HookKind;
use plinth_core::{
    EntryContext, HandlerReply, Middleware, MiddlewareOutcome, PlinthError, PluginEntry,
    PluginResponse, RouteContext, RouteHandler,
};
use plinth_hooks::{ActionHook, FilterHook, HookCallback};

use super::{ModuleRuntime, ModuleSpec};

/// Export called when the manifest reference names none.
const DEFAULT_EXPORT: &str = "handle";

/// Epoch ticks per second of wall-clock budget.
const TICKS_PER_SEC: u64 = 10;

/// Per-call execution budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmLimits {
    pub fuel: u64,
    pub epoch_timeout_secs: u64,
}

impl From<&RuntimeConfig> for WasmLimits {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            fuel: config.fuel,
            epoch_timeout_secs: config.epoch_timeout_secs,
        }
    }
}

impl Default for WasmLimits {
    fn default() -> Self {
        WasmLimits::from(&RuntimeConfig::default())
    }
}

/// Runtime for `.wasm` and `.wat` plugin modules.
pub struct WasmRuntime {
    engine: Engine,
    limits: WasmLimits,
    ticker: Arc<OnceLock<AbortOnDropHandle<()>>>,
}

impl WasmRuntime {
    pub fn new(limits: WasmLimits) -> Result<Self, PlinthError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(|e| {
            PlinthError::Internal(format!("failed to create wasmtime engine: {e}"))
        })?;
        info!(fuel = limits.fuel, timeout_secs = limits.epoch_timeout_secs, "WASM runtime initialized");
        Ok(Self {
            engine,
            limits,
            ticker: Arc::new(OnceLock::new()),
        })
    }

    /// Compiles the referenced file into a callable module.
    async fn compile(&self, spec: &ModuleSpec) -> Result<WasmModule, PlinthError> {
        let path = spec.file().ok_or_else(|| {
            PlinthError::load(&spec.plugin_id, format!("module '{spec}' is outside the plugin root"))
        })?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            PlinthError::load(&spec.plugin_id, format!("cannot read module '{spec}': {e}"))
        })?;
        let engine = self.engine.clone();
        let module = tokio::task::spawn_blocking(move || Module::new(&engine, &bytes))
            .await
            .map_err(|e| PlinthError::Internal(format!("module compilation task failed: {e}")))?
            .map_err(|e| {
                PlinthError::load(&spec.plugin_id, format!("invalid WASM module '{spec}': {e:#}"))
            })?;
        debug!(module = %spec, "WASM module compiled");

        Ok(WasmModule {
            engine: self.engine.clone(),
            module,
            limits: self.limits,
            ticker: Arc::clone(&self.ticker),
            name: spec.to_string(),
            plugin_id: spec.plugin_id.clone(),
            export: spec
                .export
                .clone()
                .unwrap_or_else(|| DEFAULT_EXPORT.to_string()),
        })
    }

    /// Compiles a module and checks that it exports the function we will call.
    async fn compile_callable(&self, spec: &ModuleSpec) -> Result<WasmModule, PlinthError> {
        let module = self.compile(spec).await?;
        if !module.has_export(&module.export) {
            return Err(PlinthError::load(
                &spec.plugin_id,
                format!("module '{spec}' has no '{}' export", module.export),
            ));
        }
        Ok(module)
    }
}

#[async_trait]
impl ModuleRuntime for WasmRuntime {
    fn name(&self) -> &'static str {
        "wasm"
    }

    fn accepts(&self, spec: &ModuleSpec) -> bool {
        matches!(spec.extension(), Some("wasm" | "wat"))
    }

    async fn import_entry(&self, spec: &ModuleSpec) -> Result<Arc<dyn PluginEntry>, PlinthError> {
        Ok(Arc::new(WasmEntry(self.compile(spec).await?)))
    }

    async fn import_route(
        &self,
        spec: &ModuleSpec,
    ) -> Result<Arc<dyn RouteHandler>, PlinthError> {
        Ok(Arc::new(WasmRoute(self.compile_callable(spec).await?)))
    }

    async fn import_middleware(
        &self,
        spec: &ModuleSpec,
    ) -> Result<Arc<dyn Middleware>, PlinthError> {
        Ok(Arc::new(WasmMiddleware(self.compile_callable(spec).await?)))
    }

    async fn import_hook(
        &self,
        spec: &ModuleSpec,
        kind: HookKind,
    ) -> Result<HookCallback, PlinthError> {
        let module = Arc::new(self.compile_callable(spec).await?);
        Ok(match kind {
            HookKind::Action => HookCallback::Action(Arc::new(WasmAction(module))),
            HookKind::Filter => HookCallback::Filter(Arc::new(WasmFilter(module))),
        })
    }
}

/// Per-call state stored in the wasmtime [`Store`].
struct CallState {
    plugin_id: String,
    input: String,
    output: Option<String>,
    status: Option<u16>,
}

/// What a call produced.
#[derive(Debug, Default, PartialEq)]
struct CallOutput {
    value: Option<Value>,
    status: Option<u16>,
}

/// A compiled module bound to one export.
struct WasmModule {
    engine: Engine,
    module: Module,
    limits: WasmLimits,
    ticker: Arc<OnceLock<AbortOnDropHandle<()>>>,
    name: String,
    plugin_id: String,
    export: String,
}

impl WasmModule {
    fn has_export(&self, name: &str) -> bool {
        self.module.get_export(name).is_some()
    }

    /// Starts the shared epoch ticker on first use.
    fn ensure_ticker(&self) {
        self.ticker.get_or_init(|| {
            let engine = self.engine.clone();
            AbortOnDropHandle::new(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(1000 / TICKS_PER_SEC));
                loop {
                    interval.tick().await;
                    engine.increment_epoch();
                }
            }))
        });
    }

    /// Calls `export` with `input` serialized as JSON.
    async fn call(&self, export: &str, input: &Value) -> Result<CallOutput, PlinthError> {
        let input = serde_json::to_string(input)
            .map_err(|e| PlinthError::Internal(format!("failed to serialize module input: {e}")))?;
        self.ensure_ticker();

        let mut store = Store::new(
            &self.engine,
            CallState {
                plugin_id: self.plugin_id.clone(),
                input,
                output: None,
                status: None,
            },
        );
        store
            .set_fuel(self.limits.fuel)
            .map_err(|e| PlinthError::Internal(format!("failed to set fuel: {e}")))?;
        store.epoch_deadline_trap();
        store.set_epoch_deadline(self.limits.epoch_timeout_secs.max(1) * TICKS_PER_SEC);

        let mut linker = Linker::new(&self.engine);
        define_host_functions(&mut linker)?;

        let module = self.module.clone();
        let export_name = export.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let instance = linker.instantiate(&mut store, &module)?;
            let func = instance
                .get_typed_func::<(), ()>(&mut store, &export_name)
                .map_err(|e| anyhow!("module has no callable '{export_name}' export: {e}"))?;
            func.call(&mut store, ())?;
            Ok::<Store<CallState>, anyhow::Error>(store)
        })
        .await
        .map_err(|e| PlinthError::Internal(format!("WASM execution task failed: {e}")))?;

        let store = result.map_err(|e| self.call_error(export, e))?;
        let state = store.into_data();
        let value = match state.output {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                PlinthError::Internal(format!("module '{}' returned invalid JSON: {e}", self.name))
            })?),
            None => None,
        };
        Ok(CallOutput {
            value,
            status: state.status,
        })
    }

    fn call_error(&self, export: &str, e: anyhow::Error) -> PlinthError {
        match e.downcast_ref::<Trap>() {
            Some(Trap::Interrupt) => PlinthError::Timeout {
                duration: Duration::from_secs(self.limits.epoch_timeout_secs),
            },
            Some(Trap::OutOfFuel) => PlinthError::Internal(format!(
                "module '{}' exceeded its fuel limit ({} units)",
                self.name, self.limits.fuel
            )),
            _ => PlinthError::Internal(format!("module '{}' failed in '{export}': {e:#}", self.name)),
        }
    }
}

/// Entry module. `activate` and `deactivate` exports are optional.
struct WasmEntry(WasmModule);

impl WasmEntry {
    async fn maybe_call(&self, export: &str, ctx: &EntryContext) -> Result<(), PlinthError> {
        if !self.0.has_export(export) {
            return Ok(());
        }
        let input = json!({ "pluginId": ctx.plugin_id, "config": ctx.config });
        let out = self.0.call(export, &input).await?;
        match out.status {
            Some(status) if status >= 400 => Err(PlinthError::Lifecycle {
                plugin_id: ctx.plugin_id.clone(),
                message: format!("entry '{export}' returned status {status}"),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PluginEntry for WasmEntry {
    async fn init(&self, ctx: &EntryContext) -> Result<(), PlinthError> {
        self.maybe_call("init", ctx).await
    }

    async fn activate(&self, ctx: &EntryContext) -> Result<(), PlinthError> {
        self.maybe_call("activate", ctx).await
    }

    async fn deactivate(&self, ctx: &EntryContext) -> Result<(), PlinthError> {
        self.maybe_call("deactivate", ctx).await
    }
}

struct WasmRoute(WasmModule);

#[async_trait]
impl RouteHandler for WasmRoute {
    async fn handle(&self, ctx: &RouteContext) -> Result<HandlerReply, PlinthError> {
        let out = self
            .0
            .call(&self.0.export, &ctx.to_json())
            .instrument(ctx.span.clone())
            .await?;
        let body = out.value.unwrap_or(Value::Null);
        Ok(match out.status {
            Some(status) => HandlerReply::Response(PluginResponse::json(status, body)),
            None => HandlerReply::Value(body),
        })
    }
}

struct WasmMiddleware(WasmModule);

#[async_trait]
impl Middleware for WasmMiddleware {
    async fn process(&self, ctx: &RouteContext) -> Result<MiddlewareOutcome, PlinthError> {
        let out = self
            .0
            .call(&self.0.export, &ctx.to_json())
            .instrument(ctx.span.clone())
            .await?;
        Ok(match out.status {
            Some(status) => MiddlewareOutcome::Respond(PluginResponse::json(
                status,
                out.value.unwrap_or(Value::Null),
            )),
            None => MiddlewareOutcome::Next,
        })
    }
}

struct WasmAction(Arc<WasmModule>);

#[async_trait]
impl ActionHook for WasmAction {
    async fn call(&self, payload: &Value) -> Result<(), PlinthError> {
        self.0.call(&self.0.export, payload).await.map(|_| ())
    }
}

struct WasmFilter(Arc<WasmModule>);

#[async_trait]
impl FilterHook for WasmFilter {
    async fn apply(&self, value: Value, context: &Value) -> Result<Value, PlinthError> {
        let input = json!({ "value": value, "context": context });
        let out = self.0.call(&self.0.export, &input).await?;
        Ok(out
            .value
            .unwrap_or_else(|| input.get("value").cloned().unwrap_or(Value::Null)))
    }
}

fn define_host_functions(linker: &mut Linker<CallState>) -> Result<(), PlinthError> {
    linker
        .func_wrap(
            "plinth",
            "log",
            |mut caller: Caller<'_, CallState>, level: i32, ptr: i32, len: i32| {
                let Some(memory) = guest_memory(&mut caller) else {
                    return;
                };
                let Some(msg) = read_string(&memory, &caller, ptr, len) else {
                    return;
                };
                let plugin_id = caller.data().plugin_id.as_str();
                match level {
                    0 => trace!(plugin_id, "{msg}"),
                    1 => debug!(plugin_id, "{msg}"),
                    3 => warn!(plugin_id, "{msg}"),
                    4 => tracing::error!(plugin_id, "{msg}"),
                    _ => info!(plugin_id, "{msg}"),
                }
            },
        )
        .map_err(linker_err)?;

    linker
        .func_wrap(
            "plinth",
            "get_input_len",
            |caller: Caller<'_, CallState>| -> i32 {
                i32::try_from(caller.data().input.len()).unwrap_or(i32::MAX)
            },
        )
        .map_err(linker_err)?;

    linker
        .func_wrap(
            "plinth",
            "get_input",
            |mut caller: Caller<'_, CallState>, ptr: i32| -> Result<(), wasmtime::Error> {
                let input = caller.data().input.clone();
                let memory =
                    guest_memory(&mut caller).ok_or_else(|| anyhow!("module exports no memory"))?;
                write_bytes(&memory, &mut caller, ptr, input.as_bytes())
                    .ok_or_else(|| anyhow!("input buffer out of bounds"))?;
                Ok(())
            },
        )
        .map_err(linker_err)?;

    linker
        .func_wrap(
            "plinth",
            "set_output",
            |mut caller: Caller<'_, CallState>, ptr: i32, len: i32| -> Result<(), wasmtime::Error> {
                let memory =
                    guest_memory(&mut caller).ok_or_else(|| anyhow!("module exports no memory"))?;
                let output = read_string(&memory, &caller, ptr, len)
                    .ok_or_else(|| anyhow!("output is out of bounds or not UTF-8"))?;
                caller.data_mut().output = Some(output);
                Ok(())
            },
        )
        .map_err(linker_err)?;

    linker
        .func_wrap(
            "plinth",
            "set_status",
            |mut caller: Caller<'_, CallState>, code: i32| -> Result<(), wasmtime::Error> {
                let status = u16::try_from(code)
                    .ok()
                    .filter(|s| (100..=599).contains(s))
                    .ok_or_else(|| anyhow!("invalid HTTP status {code}"))?;
                caller.data_mut().status = Some(status);
                Ok(())
            },
        )
        .map_err(linker_err)?;

    Ok(())
}

fn guest_memory(caller: &mut Caller<'_, CallState>) -> Option<Memory> {
    match caller.get_export("memory") {
        Some(wasmtime::Extern::Memory(mem)) => Some(mem),
        _ => None,
    }
}

fn read_string(memory: &Memory, caller: &Caller<'_, CallState>, ptr: i32, len: i32) -> Option<String> {
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    let data = memory.data(caller).get(start..end)?;
    String::from_utf8(data.to_vec()).ok()
}

fn write_bytes(
    memory: &Memory,
    caller: &mut Caller<'_, CallState>,
    ptr: i32,
    bytes: &[u8],
) -> Option<()> {
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(bytes.len())?;
    memory
        .data_mut(caller)
        .get_mut(start..end)?
        .copy_from_slice(bytes);
    Some(())
}

fn linker_err(e: anyhow::Error) -> PlinthError {
    PlinthError::Internal(format!("failed to define host function: {e}"))
}
