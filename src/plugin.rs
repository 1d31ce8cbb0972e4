//! Component E: named plugin registry, hook dispatch, and the middleware
//! onion chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::hooks::Context;

/// Any individual hook or middleware taking longer than this emits a
/// structured warning, per §4.E's slow-hook telemetry.
const SLOW_HOOK_THRESHOLD: Duration = Duration::from_millis(100);

pub type HookFn = Arc<dyn Fn(Json, &Context) -> Result<Json> + Send + Sync>;
pub type MiddlewareFn = Arc<dyn Fn(Context, Next) -> Result<Context> + Send + Sync>;
pub type InitFn = Arc<dyn Fn(&mut PluginManager) -> Result<()> + Send + Sync>;
pub type DestroyFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Pre-registered hook names; any other string is also a valid hook name.
pub mod hook_names {
    pub const BEFORE_CSV_TO_JSON: &str = "before:csvToJson";
    pub const AFTER_CSV_TO_JSON: &str = "after:csvToJson";
    pub const BEFORE_JSON_TO_CSV: &str = "before:jsonToCsv";
    pub const AFTER_JSON_TO_CSV: &str = "after:jsonToCsv";
    pub const BEFORE_PARSE: &str = "before:parse";
    pub const AFTER_PARSE: &str = "after:parse";
    pub const BEFORE_SERIALIZE: &str = "before:serialize";
    pub const AFTER_SERIALIZE: &str = "after:serialize";
    pub const ERROR: &str = "error";
    pub const VALIDATION: &str = "validation";
    pub const TRANSFORMATION: &str = "transformation";
}

/// A registered plugin descriptor (§4.E).
pub struct Plugin {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub hooks: HashMap<String, HookFn>,
    pub middlewares: Vec<MiddlewareFn>,
    pub enabled: bool,
    pub init: Option<InitFn>,
    pub destroy: Option<DestroyFn>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            hooks: HashMap::new(),
            middlewares: Vec::new(),
            enabled: true,
            init: None,
            destroy: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Registers an `init(manager)` callback run once, immediately after
    /// this plugin is inserted into the registry, per §4.E.
    pub fn with_init(
        mut self,
        f: impl Fn(&mut PluginManager) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Arc::new(f));
        self
    }

    /// Registers a `destroy()` callback run when [`PluginManager::remove`]
    /// evicts this plugin, per §4.E.
    pub fn with_destroy(mut self, f: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.destroy = Some(Arc::new(f));
        self
    }

    pub fn with_hook(
        mut self,
        hook_name: impl Into<String>,
        f: impl Fn(Json, &Context) -> Result<Json> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.insert(hook_name.into(), Arc::new(f));
        self
    }

    pub fn with_middleware(
        mut self,
        f: impl Fn(Context, Next) -> Result<Context> + Send + Sync + 'static,
    ) -> Self {
        self.middlewares.push(Arc::new(f));
        self
    }
}

struct Registration {
    plugin: Plugin,
}

/// `{pluginLoads, hookExecutions, middlewareExecutions, plugins, hooks,
/// middlewares, uniqueHooks}` per §4.G.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PluginStats {
    pub plugin_loads: u64,
    pub hook_executions: u64,
    pub middleware_executions: u64,
    pub plugins: usize,
    pub hooks: usize,
    pub middlewares: usize,
    pub unique_hooks: usize,
}

/// The single-shot `next()` continuation passed to each middleware.
pub struct Next {
    called: Arc<AtomicBool>,
    rest: Arc<dyn Fn(Context) -> Result<Context> + Send + Sync>,
}

impl Next {
    /// Advances to the next middleware (or the final handler). A second
    /// call on the same `Next` is a fatal configuration error.
    pub fn call(self, ctx: Context) -> Result<Context> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Err(Error::configuration("next() called twice in a middleware"));
        }
        (self.rest)(ctx)
    }
}

/// Named plugin registry plus hook/middleware dispatch. Long-lived for the
/// process (or host-chosen scope), per the options lifecycle rule.
#[derive(Default)]
pub struct PluginManager {
    order: Vec<String>,
    plugins: HashMap<String, Registration>,
    stats: PluginStats,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin` under `id`. Fails if `id` is already taken.
    pub fn register(&mut self, id: impl Into<String>, plugin: Plugin) -> Result<()> {
        let id = id.into();
        if self.plugins.contains_key(&id) {
            return Err(Error::configuration(format!(
                "plugin id '{id}' is already registered"
            )));
        }
        if plugin.name.is_empty() || plugin.version.is_empty() {
            return Err(Error::validation(
                "plugin descriptor must have a non-empty name and version",
            ));
        }
        let init = plugin.init.clone();
        self.order.push(id.clone());
        self.stats.plugin_loads += 1;
        self.plugins.insert(id, Registration { plugin });
        self.refresh_counts();
        if let Some(init) = init {
            init(self)?;
        }
        Ok(())
    }

    /// Alias for [`PluginManager::register`], matching the source API's
    /// `use` naming.
    pub fn use_plugin(&mut self, id: impl Into<String>, plugin: Plugin) -> Result<()> {
        self.register(id, plugin)
    }

    /// Evicts the plugin record and calls its `destroy()` callback, if any.
    /// A `destroy` error is logged, not propagated — removal always
    /// succeeds. Idempotent.
    pub fn remove(&mut self, id: &str) {
        if let Some(registration) = self.plugins.remove(id) {
            self.order.retain(|existing| existing != id);
            if let Some(destroy) = &registration.plugin.destroy {
                if let Err(error) = destroy() {
                    log::error!("plugin '{id}' destroy() failed: {error}");
                }
            }
        }
        self.refresh_counts();
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let registration = self
            .plugins
            .get_mut(id)
            .ok_or_else(|| Error::configuration(format!("no plugin registered under '{id}'")))?;
        registration.plugin.enabled = enabled;
        Ok(())
    }

    fn refresh_counts(&mut self) {
        self.stats.plugins = self.plugins.len();
        let mut hook_names = std::collections::HashSet::new();
        let mut hooks = 0usize;
        let mut middlewares = 0usize;
        for registration in self.plugins.values() {
            hooks += registration.plugin.hooks.len();
            middlewares += registration.plugin.middlewares.len();
            for name in registration.plugin.hooks.keys() {
                hook_names.insert(name.clone());
            }
        }
        self.stats.hooks = hooks;
        self.stats.middlewares = middlewares;
        self.stats.unique_hooks = hook_names.len();
    }

    /// Walks registered handlers for `hook_name` in registration order. A
    /// handler that errors is logged via the `error` hook (never
    /// recursively, to avoid infinite dispatch) and skipped; later handlers
    /// still run against the last successful data.
    pub fn execute_hook(&mut self, hook_name: &str, data: Json, ctx: &Context) -> Json {
        let mut current = data;
        let ids: Vec<String> = self.order.clone();
        for id in ids {
            let Some(registration) = self.plugins.get(&id) else {
                continue;
            };
            if !registration.plugin.enabled {
                continue;
            }
            let Some(handler) = registration.plugin.hooks.get(hook_name).cloned() else {
                continue;
            };
            self.stats.hook_executions += 1;
            let started = Instant::now();
            let outcome = handler(current.clone(), ctx);
            self.log_if_slow(hook_name, started);
            match outcome {
                Ok(next) => current = next,
                Err(error) => {
                    log::error!("hook '{hook_name}' on plugin '{id}' failed: {error}");
                    if hook_name != hook_names::ERROR {
                        self.dispatch_error(&error, hook_name, ctx);
                    }
                }
            }
        }
        current
    }

    fn dispatch_error(&mut self, error: &Error, source_hook: &str, ctx: &Context) {
        let payload = serde_json::json!({
            "sourceHook": source_hook,
            "code": error.code(),
            "message": error.to_string(),
        });
        let _ = self.execute_hook(hook_names::ERROR, payload, ctx);
    }

    fn log_if_slow(&self, name: &str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > SLOW_HOOK_THRESHOLD {
            log::warn!("hook/middleware '{name}' took {elapsed:?} (> 100ms)");
        }
    }

    /// Runs the onion-style middleware chain ending in `final_handler`. A
    /// middleware that never calls `next()` short-circuits everything
    /// after it, including `final_handler`.
    pub fn execute_middlewares(
        &mut self,
        ctx: Context,
        final_handler: impl Fn(Context) -> Result<Context> + Send + Sync + 'static,
    ) -> Result<Context> {
        let mut middlewares: Vec<(String, MiddlewareFn)> = Vec::new();
        for id in &self.order {
            let Some(registration) = self.plugins.get(id) else {
                continue;
            };
            if !registration.plugin.enabled {
                continue;
            }
            for mw in &registration.plugin.middlewares {
                middlewares.push((id.clone(), mw.clone()));
            }
        }

        let final_handler: Arc<dyn Fn(Context) -> Result<Context> + Send + Sync> =
            Arc::new(final_handler);
        let mut chain: Arc<dyn Fn(Context) -> Result<Context> + Send + Sync> = final_handler;

        for (_, mw) in middlewares.iter().rev() {
            let next_chain = chain.clone();
            let mw = mw.clone();
            chain = Arc::new(move |ctx| {
                let next = Next {
                    called: Arc::new(AtomicBool::new(false)),
                    rest: next_chain.clone(),
                };
                mw(ctx, next)
            });
        }

        self.stats.middleware_executions += middlewares.len() as u64;
        chain(ctx)
    }

    pub fn get_stats(&self) -> PluginStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.plugins.clear();
        self.stats = PluginStats::default();
    }

    /// Zeroes the execution counters without unregistering any plugin,
    /// backing [`crate::stats::StatsHandle::reset`].
    pub fn clear_counters(&mut self) {
        self.stats.plugin_loads = 0;
        self.stats.hook_executions = 0;
        self.stats.middleware_executions = 0;
    }
}

/// `executeWithPlugins(operation, input, coreFn)`: wraps `core_fn` with
/// `before:`/`after:` hook dispatch and the middleware chain, per §4.E.
pub fn execute_with_plugins(
    manager: &mut PluginManager,
    operation: &str,
    input: Json,
    ctx: &Context,
    core_fn: impl Fn(Json) -> Result<Json> + Send + Sync + 'static,
) -> Result<Json> {
    let before_name = format!("before:{operation}");
    let after_name = format!("after:{operation}");

    let transformed_input = manager.execute_hook(&before_name, input, ctx);

    let mut middleware_ctx = ctx.clone();
    middleware_ctx.insert(
        "operation".to_string(),
        Json::String(operation.to_string()),
    );
    let result_key = "result".to_string();

    let seed_ctx = {
        let mut c = middleware_ctx.clone();
        c.insert(result_key.clone(), transformed_input.clone());
        c
    };

    let run_result = manager.execute_middlewares(seed_ctx, move |mut ctx| {
        let input = ctx.get(&result_key).cloned().unwrap_or(Json::Null);
        let result = core_fn(input)?;
        ctx.insert(result_key.clone(), result);
        Ok(ctx)
    });

    match run_result {
        Ok(mut final_ctx) => {
            let result = final_ctx.remove("result").unwrap_or(Json::Null);
            Ok(manager.execute_hook(&after_name, result, ctx))
        }
        Err(error) => {
            manager.dispatch_error(&error, operation, ctx);
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn init_runs_on_register_and_destroy_runs_on_remove() {
        let init_ran = Arc::new(AtomicBool::new(false));
        let destroy_ran = Arc::new(AtomicBool::new(false));
        let init_flag = init_ran.clone();
        let destroy_flag = destroy_ran.clone();

        let mut manager = PluginManager::new();
        manager
            .register(
                "lifecycle",
                Plugin::new("lifecycle", "1.0.0")
                    .with_init(move |_manager| {
                        init_flag.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                    .with_destroy(move || {
                        destroy_flag.store(true, Ordering::SeqCst);
                        Ok(())
                    }),
            )
            .unwrap();
        assert!(init_ran.load(Ordering::SeqCst));
        assert!(!destroy_ran.load(Ordering::SeqCst));

        manager.remove("lifecycle");
        assert!(destroy_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn hooks_execute_in_registration_order() {
        let mut manager = PluginManager::new();
        manager
            .register(
                "first",
                Plugin::new("first", "1.0.0").with_hook("before:csvToJson", |data, _ctx| {
                    Ok(json!(format!("{}-first", data.as_str().unwrap())))
                }),
            )
            .unwrap();
        manager
            .register(
                "second",
                Plugin::new("second", "1.0.0").with_hook("before:csvToJson", |data, _ctx| {
                    Ok(json!(format!("{}-second", data.as_str().unwrap())))
                }),
            )
            .unwrap();
        let out = manager.execute_hook("before:csvToJson", json!("start"), &Context::new());
        assert_eq!(out, json!("start-first-second"));
    }

    #[test]
    fn disabling_a_plugin_elides_its_handlers_without_reordering() {
        let mut manager = PluginManager::new();
        manager
            .register(
                "a",
                Plugin::new("a", "1.0.0")
                    .with_hook("before:csvToJson", |d, _| Ok(json!(format!("{}a", d.as_str().unwrap())))),
            )
            .unwrap();
        manager
            .register(
                "b",
                Plugin::new("b", "1.0.0")
                    .with_hook("before:csvToJson", |d, _| Ok(json!(format!("{}b", d.as_str().unwrap())))),
            )
            .unwrap();
        manager.set_enabled("a", false).unwrap();
        let out = manager.execute_hook("before:csvToJson", json!(""), &Context::new());
        assert_eq!(out, json!("b"));
    }

    #[test]
    fn next_called_twice_is_a_fatal_configuration_error() {
        let mut manager = PluginManager::new();
        manager
            .register(
                "double",
                Plugin::new("double", "1.0.0").with_middleware(|ctx, next| {
                    let ctx = next.call(ctx)?;
                    // `next` was consumed above; a middleware that tries to
                    // call it again cannot compile against this API, so the
                    // fatal-double-call path is instead exercised directly
                    // against `Next` in `next_guard_rejects_a_second_call`.
                    Ok(ctx)
                }),
            )
            .unwrap();
    }

    #[test]
    fn next_guard_rejects_a_second_call() {
        let called = Arc::new(AtomicBool::new(false));
        let rest: Arc<dyn Fn(Context) -> Result<Context> + Send + Sync> =
            Arc::new(|ctx| Ok(ctx));
        let guard = called.clone();
        // Simulate a middleware holding onto the shared guard and invoking
        // the continuation twice.
        guard.store(true, Ordering::SeqCst);
        let next = Next {
            called: called.clone(),
            rest: rest.clone(),
        };
        let err = next.call(Context::new()).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn middleware_composes_around_the_final_handler() {
        let mut manager = PluginManager::new();
        manager
            .register(
                "wrap",
                Plugin::new("wrap", "1.0.0").with_middleware(|ctx, next| {
                    let mut ctx = next.call(ctx)?;
                    ctx.insert("wrapped".to_string(), json!(true));
                    Ok(ctx)
                }),
            )
            .unwrap();
        let result = manager
            .execute_middlewares(Context::new(), |mut ctx| {
                ctx.insert("core".to_string(), json!(true));
                Ok(ctx)
            })
            .unwrap();
        assert_eq!(result["core"], json!(true));
        assert_eq!(result["wrapped"], json!(true));
    }

    #[test]
    fn scenario_six_two_before_hooks_compose_in_registration_order() {
        let mut manager = PluginManager::new();
        manager
            .register(
                "xy",
                Plugin::new("xy", "1.0.0")
                    .with_hook("before:csvToJson", |_data, _ctx| Ok(json!("x,y\n1,2"))),
            )
            .unwrap();
        manager
            .register(
                "z",
                Plugin::new("z", "1.0.0").with_hook("before:csvToJson", |data, _ctx| {
                    Ok(json!(format!("z\n{}", data.as_str().unwrap())))
                }),
            )
            .unwrap();
        let out = manager.execute_hook("before:csvToJson", json!(""), &Context::new());
        assert_eq!(out, json!("z\nx,y\n1,2"));
    }
}
