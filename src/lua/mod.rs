//! Embedded Lua runtime hosting chdkptp.
//!
//! [`LuaContext`] owns one interpreter. Every call into chdkptp goes through
//! Lua's `pcall`, and failures are turned into [`ChdkError`]s. String errors
//! become runtime errors and chdkptp's `{etype = "ptp", ...}` error tables
//! become PTP errors.

pub mod value;

use crate::config::RuntimeConfig;
use crate::errors::{ChdkError, Result};
use crate::types::LuaValue;
use mlua::{FromLuaMulti, Function, IntoLua, IntoLuaMulti, Lua, MultiValue, Table, Value};
use std::sync::Mutex;

pub use value::{from_lua, to_lua};

/// Modules loaded into globals when the runtime boots.
const BOOTSTRAP: &str = r#"
require('chdkptp')
util = require('util')
util:import()
varsubst = require('varsubst')
chdku = require('chdku')
exposure = require('exposure')
dng = require('dng')
prefs = require('prefs')
fsutil = require('fsutil')
"#;

const LOG_BRIDGE: &str = r#"
return function(info, debug, err)
    cli = cli or {}
    cli.infomsg = function(...) info(string.format(...)) end
    cli.dbgmsg = function(...) debug(string.format(...)) end
    cli.errmsg = function(...) err(string.format(...)) end
end
"#;

lazy_static::lazy_static! {
    static ref GLOBAL_LUA: Mutex<Option<LuaContext>> = Mutex::new(None);
}

/// Proxy around a Lua runtime that runs chdkptp code in protected mode.
pub struct LuaContext {
    lua: Lua,
}

impl std::fmt::Debug for LuaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaContext").finish_non_exhaustive()
    }
}

impl LuaContext {
    /// Create a runtime with chdkptp loaded from `config.chdkptp_path`.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let ctx = Self::bare()?;
        ctx.ensure_not_jit()?;
        ctx.setup_runtime(config)?;
        Ok(ctx)
    }

    /// Create a runtime with the standard libraries only.
    ///
    /// Native modules can be loaded into it; chdkptp's core is one.
    pub fn bare() -> Result<Self> {
        // SAFETY: the runtime needs `package.loadlib` to load chdkptp's
        // native core module; no other unsafe library is used from Rust.
        let lua = unsafe { Lua::unsafe_new() };
        Ok(Self { lua })
    }

    fn ensure_not_jit(&self) -> Result<()> {
        let is_jit: bool = self.lua.load("return type(jit) == 'table'").eval()?;
        if is_jit {
            return Err(ChdkError::Unsupported(
                "the embedded runtime must be PUC Lua, not LuaJIT".to_string(),
            ));
        }
        Ok(())
    }

    fn setup_runtime(&self, config: &RuntimeConfig) -> Result<()> {
        let root = &config.chdkptp_path;
        if !root.join("lua").is_dir() {
            return Err(ChdkError::Config(format!(
                "chdkptp installation not found at {}",
                root.display()
            )));
        }
        let root = root.to_string_lossy();
        log::debug!("Loading chdkptp from {}", root);

        let package: Table = self.lua.globals().get("package")?;
        let path: String = package.get("path")?;
        package.set("path", format!("{root}/lua/?.lua;{path}"))?;
        let cpath: String = package.get("cpath")?;
        package.set(
            "cpath",
            format!("{root}/?.{};{cpath}", std::env::consts::DLL_EXTENSION),
        )?;
        self.lua.globals().set("CHDKPTP_PATH", &*root)?;

        self.lua.load(BOOTSTRAP).set_name("bootstrap").exec()?;
        self.call("prefs._set", ("cli_verbose", config.verbosity), None)?;
        self.install_log_bridge()?;
        self.execute("con = chdku.connection()")?;
        Ok(())
    }

    /// Route chdkptp's `cli.infomsg`/`cli.dbgmsg`/`cli.errmsg` into `log`.
    pub fn install_log_bridge(&self) -> Result<()> {
        let info = self.lua.create_function(|_, msg: mlua::String| {
            log::info!(target: "chdkptp::lua", "{}", msg.to_string_lossy().trim_end());
            Ok(())
        })?;
        let debug = self.lua.create_function(|_, msg: mlua::String| {
            log::debug!(target: "chdkptp::lua", "{}", msg.to_string_lossy().trim_end());
            Ok(())
        })?;
        let error = self.lua.create_function(|_, msg: mlua::String| {
            log::error!(target: "chdkptp::lua", "{}", msg.to_string_lossy().trim_end());
            Ok(())
        })?;
        let install: Function = self.lua.load(LOG_BRIDGE).set_name("log_bridge").eval()?;
        install.call::<()>((info, debug, error))?;
        Ok(())
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn globals(&self) -> Table {
        self.lua.globals()
    }

    pub fn set_global(&self, name: &str, value: impl IntoLua) -> Result<()> {
        self.lua.globals().set(name, value)?;
        Ok(())
    }

    /// Evaluate an expression without protection.
    pub fn eval<R: FromLuaMulti>(&self, code: &str) -> Result<R> {
        Ok(self.lua.load(code).eval()?)
    }

    /// Execute a chunk without protection.
    pub fn execute(&self, code: &str) -> Result<()> {
        self.lua.load(code).exec()?;
        Ok(())
    }

    /// Evaluate an expression inside `pcall`.
    pub fn peval(&self, code: &str) -> Result<Value> {
        let func = match self.lua.load(format!("return {code}")).into_function() {
            Ok(func) => func,
            Err(_) => self.lua.load(code).into_function()?,
        };
        self.protected_call(&func, MultiValue::new())
    }

    /// Execute a chunk inside `pcall`, returning its first result.
    pub fn pexecute(&self, code: &str) -> Result<Value> {
        let func = self.lua.load(code).into_function()?;
        self.protected_call(&func, MultiValue::new())
    }

    /// Call a global function (`"chdku.connection"`) or a method
    /// (`"con:listdir"`) inside `pcall`.
    ///
    /// `options` is appended as the final argument, which is how chdkptp
    /// takes keyword-style parameters.
    pub fn call(
        &self,
        funcname: &str,
        args: impl IntoLuaMulti,
        options: Option<Table>,
    ) -> Result<Value> {
        let mut args = args.into_lua_multi(&self.lua)?;
        let func = match funcname.split_once(':') {
            Some((object, method)) => {
                let target = self.lookup(object)?;
                let func = match &target {
                    Value::Table(t) => t.get::<Value>(method)?,
                    other => {
                        return Err(ChdkError::Runtime(format!(
                            "cannot call method '{method}' on {} value '{object}'",
                            other.type_name()
                        )))
                    }
                };
                args.push_front(target);
                func
            }
            None => self.lookup(funcname)?,
        };
        let func = match func {
            Value::Function(f) => f,
            other => {
                return Err(ChdkError::Runtime(format!(
                    "'{funcname}' is not a function (got {})",
                    other.type_name()
                )))
            }
        };
        if let Some(options) = options {
            args.push_back(Value::Table(options));
        }
        self.protected_call(&func, args)
    }

    /// [`call`](Self::call), converting the result to native data.
    pub fn call_value(
        &self,
        funcname: &str,
        args: impl IntoLuaMulti,
        options: Option<Table>,
    ) -> Result<LuaValue> {
        let value = self.call(funcname, args, options)?;
        from_lua(&value)
    }

    /// Call `func` through Lua's `pcall` and check its results.
    pub fn protected_call(&self, func: &Function, args: MultiValue) -> Result<Value> {
        let pcall: Function = self.lua.globals().get("pcall")?;
        let mut call_args = args;
        call_args.push_front(Value::Function(func.clone()));
        let results: MultiValue = pcall.call(call_args)?;
        self.check_results(results)
    }

    fn check_results(&self, results: MultiValue) -> Result<Value> {
        let mut values = results.into_iter();
        match values.next() {
            Some(Value::Boolean(true)) => {}
            _ => return Err(self.error_from(values.next().unwrap_or(Value::Nil))),
        }
        let first = values.next().unwrap_or(Value::Nil);
        if first.is_nil() {
            if let Some(err) = values.next() {
                if !err.is_nil() {
                    return Err(self.error_from(err));
                }
            }
        }
        Ok(first)
    }

    /// Turn a Lua error value into a crate error.
    pub fn error_from(&self, err: Value) -> ChdkError {
        match err {
            Value::Nil => ChdkError::Runtime("unknown error".to_string()),
            Value::String(s) => ChdkError::Runtime(s.to_string_lossy().to_string()),
            Value::Integer(i) => ChdkError::Runtime(i.to_string()),
            Value::Number(n) => ChdkError::Runtime(n.to_string()),
            Value::Table(t) => {
                let etype: Option<String> = t.get("etype").ok().flatten();
                let message: Option<String> = t.get("msg").ok().flatten();
                if etype.as_deref() == Some("ptp") {
                    return ChdkError::Ptp {
                        message: message.unwrap_or_else(|| "unknown PTP error".to_string()),
                        code: t.get::<Option<i64>>("ptp_rc").ok().flatten(),
                        traceback: t.get::<Option<String>>("traceback").ok().flatten(),
                    };
                }
                if etype.as_deref() == Some("timeout") {
                    return ChdkError::Timeout(message.unwrap_or_else(|| "timed out".to_string()));
                }
                let parsed = match from_lua(&Value::Table(t)) {
                    Ok(parsed) => parsed,
                    Err(e) => return e,
                };
                match (message, parsed) {
                    (Some(message), LuaValue::Table(mut fields)) => {
                        fields.remove("msg");
                        if fields.is_empty() {
                            ChdkError::Runtime(message)
                        } else {
                            ChdkError::Runtime(format!("{message} {fields:?}"))
                        }
                    }
                    (Some(message), _) => ChdkError::Runtime(message),
                    (None, parsed) => ChdkError::Runtime(format!("{parsed:?}")),
                }
            }
            other => ChdkError::Runtime(format!("error object of type {}", other.type_name())),
        }
    }

    /// Resolve a dotted global path such as `chdku.connection`.
    pub fn lookup(&self, path: &str) -> Result<Value> {
        let mut current = Value::Table(self.lua.globals());
        for part in path.split('.') {
            current = match current {
                Value::Table(t) => t.get::<Value>(part)?,
                _ => return Err(ChdkError::NotFound(format!("Lua global '{path}'"))),
            };
        }
        if current.is_nil() {
            return Err(ChdkError::NotFound(format!("Lua global '{path}'")));
        }
        Ok(current)
    }

    pub fn table(&self) -> Result<Table> {
        Ok(self.lua.create_table()?)
    }

    /// Table from key/value pairs, for chdkptp option arguments.
    pub fn table_from<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Table>
    where
        K: IntoLua,
        V: IntoLua,
    {
        Ok(self.lua.create_table_from(pairs)?)
    }

    /// Array-like table from a list of values.
    pub fn sequence<V: IntoLua>(&self, items: impl IntoIterator<Item = V>) -> Result<Table> {
        Ok(self.lua.create_sequence_from(items)?)
    }

    pub fn to_lua(&self, value: &LuaValue) -> Result<Value> {
        to_lua(&self.lua, value)
    }

    pub fn from_lua(&self, value: &Value) -> Result<LuaValue> {
        from_lua(value)
    }

    /// Evaluate a serialized table sent by the camera in an empty
    /// environment, so it cannot reach host globals.
    pub fn parse_serialized(&self, text: &str) -> Result<LuaValue> {
        let env = self.lua.create_table()?;
        let value: Value = self
            .lua
            .load(format!("return {text}"))
            .set_name("message")
            .set_environment(env)
            .eval()?;
        from_lua(&value)
    }
}

/// Run `f` with the process-wide runtime, creating it from the global
/// configuration on first use.
pub fn with_global<R>(f: impl FnOnce(&LuaContext) -> Result<R>) -> Result<R> {
    let mut guard = GLOBAL_LUA
        .lock()
        .map_err(|_| ChdkError::Runtime("global Lua runtime lock poisoned".to_string()))?;
    if guard.is_none() {
        let config = crate::config::global();
        *guard = Some(LuaContext::new(&config.runtime)?);
    }
    match guard.as_ref() {
        Some(ctx) => f(ctx),
        None => Err(ChdkError::Runtime("global Lua runtime unavailable".to_string())),
    }
}

/// Replace the process-wide runtime, e.g. with one pointed at another
/// chdkptp installation.
pub fn install_global(ctx: LuaContext) -> Result<()> {
    let mut guard = GLOBAL_LUA
        .lock()
        .map_err(|_| ChdkError::Runtime("global Lua runtime lock poisoned".to_string()))?;
    *guard = Some(ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pexecute_returns_first_value() {
        let ctx = LuaContext::bare().unwrap();
        let value = ctx.pexecute("return 1, 2").unwrap();
        assert_eq!(from_lua(&value).unwrap(), LuaValue::Integer(1));
    }

    #[test]
    fn test_peval_accepts_expressions_and_statements() {
        let ctx = LuaContext::bare().unwrap();
        assert_eq!(
            from_lua(&ctx.peval("1 + 1").unwrap()).unwrap(),
            LuaValue::Integer(2)
        );
        assert_eq!(
            from_lua(&ctx.peval("local x = 3 return x").unwrap()).unwrap(),
            LuaValue::Integer(3)
        );
    }

    #[test]
    fn test_string_error_becomes_runtime_error() {
        let ctx = LuaContext::bare().unwrap();
        let err = ctx.pexecute("error('boom', 0)").unwrap_err();
        match err {
            ChdkError::Runtime(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_other_error_table_keeps_its_fields() {
        let ctx = LuaContext::bare().unwrap();
        let err = ctx
            .pexecute("error({etype = 'remote', msg = 'script failed', status = 3})")
            .unwrap_err();
        match err {
            ChdkError::Runtime(msg) => {
                assert!(msg.starts_with("script failed"));
                assert!(msg.contains("etype"));
                assert!(msg.contains("remote"));
                assert!(msg.contains("status"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = ctx.pexecute("error({msg = 'plain'})").unwrap_err();
        assert!(matches!(err, ChdkError::Runtime(ref msg) if msg == "plain"));
    }

    #[test]
    fn test_ptp_error_table() {
        let ctx = LuaContext::bare().unwrap();
        let err = ctx
            .pexecute("error({etype = 'ptp', msg = 'I/O error', ptp_rc = 8194, traceback = 'tb'})")
            .unwrap_err();
        assert_eq!(err.ptp_code(), Some(8194));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("ptp_code: 8194"));
    }

    #[test]
    fn test_nil_err_convention_raises() {
        let ctx = LuaContext::bare().unwrap();
        ctx.execute("function failing() return nil, 'no such file' end")
            .unwrap();
        let err = ctx.call("failing", (), None).unwrap_err();
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_method_call_with_options() {
        let ctx = LuaContext::bare().unwrap();
        ctx.execute(
            r#"
            obj = {prefix = 'A/'}
            function obj:join(name, opts)
                return self.prefix .. name .. (opts and opts.suffix or '')
            end
            "#,
        )
        .unwrap();
        let opts = ctx.table_from([("suffix", ".JPG")]).unwrap();
        let value = ctx.call_value("obj:join", "IMG_0001", Some(opts)).unwrap();
        assert_eq!(value, LuaValue::from("A/IMG_0001.JPG"));
    }

    #[test]
    fn test_missing_function() {
        let ctx = LuaContext::bare().unwrap();
        assert!(matches!(
            ctx.call("does.not.exist", (), None),
            Err(ChdkError::NotFound(_))
        ));
    }

    #[test]
    fn test_serialized_tables_cannot_reach_globals() {
        let ctx = LuaContext::bare().unwrap();
        let parsed = ctx.parse_serialized("{dir=\"A/DCIM\",exp=3}").unwrap();
        assert_eq!(parsed.get("exp"), Some(&LuaValue::Integer(3)));
        assert!(ctx.parse_serialized("{os.exit(1)}").is_err());
    }

    #[test]
    fn test_new_requires_installation() {
        let config = RuntimeConfig {
            chdkptp_path: std::path::PathBuf::from("/nonexistent/chdkptp"),
            verbosity: 0,
        };
        assert!(matches!(LuaContext::new(&config), Err(ChdkError::Config(_))));
    }
}
