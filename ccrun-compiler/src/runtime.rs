// Runtime: libtcc + symbol resolver + configuration, and the session factory
// every compile path goes through.

use std::sync::{Arc, OnceLock};

use ccrun_runtime::crash::{self, EntryPoint};
use ccrun_runtime::{ExecutionResult, ProgramArgs, SourceIdentity};

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::platform::Platform;
use crate::session::{undefined_symbols, CompilerSession, OutputMode};
use crate::symbols::SymbolResolver;
use crate::tcc::Libtcc;
use crate::{API_DECLARATIONS, DEFAULT_OPTIONS, ENGINE_DEFINE, INLINE_UNIT, MAX_CODE_LEN};

static INSTALLED: OnceLock<Runtime> = OnceLock::new();

#[derive(Debug)]
pub struct Runtime {
    config: Config,
    platform: Platform,
    tcc: Arc<Libtcc>,
    symbols: SymbolResolver,
}

impl Runtime {
    pub fn new(config: Config) -> Result<Self> {
        let platform = Platform::detect();
        let tcc = Arc::new(Libtcc::load(&config, &platform)?);
        let symbols = SymbolResolver::new(platform, config.foreign_abi);
        symbols.preload(&config.host_libraries);

        log::debug!(
            "runtime ready on {} ({} builtins, {} libraries)",
            platform.display_name(),
            symbols.builtins().len(),
            symbols.libraries().len()
        );

        Ok(Self {
            config,
            platform,
            tcc,
            symbols,
        })
    }

    /// Process-wide runtime, created on first use from the installed [`Config`].
    /// Compiled code reaches this one through `__import`/`__sym`.
    pub fn global() -> Result<&'static Runtime> {
        if let Some(runtime) = INSTALLED.get() {
            return Ok(runtime);
        }
        let config = Config::get()?.clone();
        let runtime = Runtime::new(config)?;
        Ok(INSTALLED.get_or_init(|| runtime))
    }

    pub fn installed() -> Option<&'static Runtime> {
        INSTALLED.get()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn symbols(&self) -> &SymbolResolver {
        &self.symbols
    }

    /// Session factory: options, target defines, search paths and (for
    /// memory output) the builtin table plus the libtcc API.
    ///
    /// Object-mode sessions leave external references unresolved; they are
    /// bound when the object is loaded.
    pub fn create_session(&self, mode: OutputMode, unit: &str) -> Result<CompilerSession> {
        let mut session = CompilerSession::new(Arc::clone(&self.tcc), mode, unit)?;

        if let Some(dir) = &self.config.tcc_lib_path {
            session.set_lib_path(dir)?;
        }
        session.set_options(DEFAULT_OPTIONS)?;
        session.set_output_mode()?;

        for name in self.platform.target_defines() {
            session.define(name, None)?;
        }
        session.define(ENGINE_DEFINE, None)?;

        for dir in self.platform.default_include_dirs() {
            session.add_sysinclude_path(&dir)?;
        }
        for dir in &self.config.include_paths {
            session.add_include_path(dir)?;
        }
        for dir in self.platform.default_library_dirs() {
            session.add_library_path(&dir)?;
        }
        for dir in &self.config.library_paths {
            session.add_library_path(dir)?;
        }

        if mode == OutputMode::Memory {
            self.symbols.register_builtins(&mut session);
            self.register_compiler_api(&mut session);
        }
        Ok(session)
    }

    /// libtcc addresses are only known once it is loaded, so they are added
    /// per session rather than kept in the builtin table.
    fn register_compiler_api(&self, session: &mut CompilerSession) {
        for (name, address) in self.tcc.exported_api() {
            if let Err(e) = session.add_symbol(name, address) {
                log::warn!("'{}' not registered: {}", name, e);
            }
        }
    }

    /// Create a memory session, feed it through `load`, and relocate.
    ///
    /// References left undefined after linking are looked up in the opened
    /// libraries; if all of them resolve, the unit is rebuilt once in a fresh
    /// session with those addresses pre-registered.
    pub(crate) fn build<F>(&self, unit: &str, load: F) -> Result<CompilerSession>
    where
        F: Fn(&mut CompilerSession) -> Result<()>,
    {
        let mut session = self.create_session(OutputMode::Memory, unit)?;
        load(&mut session)?;
        let err = match session.relocate() {
            Ok(()) => return Ok(session),
            Err(err) => err,
        };
        drop(session);

        let missing = match &err {
            EngineError::Compilation { messages, .. } => undefined_symbols(messages),
            _ => return Err(err),
        };
        if missing.is_empty() {
            return Err(err);
        }

        let mut late = Vec::with_capacity(missing.len());
        for name in &missing {
            match self.symbols.resolve(name) {
                Some(addr) => late.push((name.as_str(), addr)),
                None => return Err(err),
            }
        }
        log::debug!("{}: late-binding {}", unit, missing.join(", "));

        let mut session = self.create_session(OutputMode::Memory, unit)?;
        for (name, addr) in late {
            session.add_symbol(name, addr)?;
        }
        load(&mut session)?;
        session.relocate()?;
        Ok(session)
    }

    /// Compile `code` (plus the module contract declarations) and run its `main`.
    pub fn run_inline(&self, code: &str, args: &[String]) -> Result<ExecutionResult> {
        let source = inline_source(code)?;
        let session = self.build(INLINE_UNIT, |s| s.compile_string(&source))?;
        run_entry(&session, "main", INLINE_UNIT, args)
    }
}

/// Inline translation unit; `#line` keeps diagnostics relative to the user's code.
pub fn inline_source(code: &str) -> Result<String> {
    validate_code(code)?;
    let source = format!(
        "{}#line 1 {}\n{}\n",
        API_DECLARATIONS,
        c_string_literal(INLINE_UNIT),
        code
    );
    if source.len() > MAX_CODE_LEN {
        return Err(EngineError::InvalidArgument(format!(
            "code exceeds {} bytes",
            MAX_CODE_LEN
        )));
    }
    Ok(source)
}

pub(crate) fn validate_code(code: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(EngineError::InvalidArgument("empty code".to_string()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(EngineError::InvalidArgument(format!(
            "code exceeds {} bytes",
            MAX_CODE_LEN
        )));
    }
    Ok(())
}

/// Quote `text` as a C string literal.
pub(crate) fn c_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Call `name` in a relocated session as `int name(argc, argv, envp)` under
/// the crash guard. `program` becomes `argv[0]`.
pub(crate) fn run_entry(
    session: &CompilerSession,
    name: &str,
    program: &str,
    args: &[String],
) -> Result<ExecutionResult> {
    let address = session
        .symbol(name)
        .ok_or_else(|| EngineError::SymbolNotFound(name.to_string()))?;

    let argv = std::iter::once(program.to_string()).chain(args.iter().cloned());
    let program_args = ProgramArgs::new(argv)?;

    // SAFETY: non-null address of a relocated function; C callers ignore
    // extra arguments, so zero-argument entries are fine too.
    let entry = unsafe { std::mem::transmute::<usize, EntryPoint>(address) };
    let identity = SourceIdentity::new(session.unit(), name, 0);

    log::debug!("running {} from {}", name, session.unit());
    Ok(unsafe { crash::execute(&identity, session.id(), entry, &program_args) })
}
