use rustc_demangle::demangle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;

/// Symbolizer for resolving in-process instruction pointers to source locations
///
/// Resolution goes through the debug info of the running binary and its
/// loaded libraries. Includes a cache so stacks that share frames only pay
/// for each address once.
#[derive(Default)]
pub struct Symbolizer {
    /// Cache of resolved frames by address
    cache: RefCell<HashMap<u64, ResolvedFrame>>,
}

impl Symbolizer {
    /// Create a new symbolizer with an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an instruction pointer to source location information
    ///
    /// Uses a cache to avoid re-resolving the same address multiple times.
    pub fn resolve(&self, addr: u64) -> ResolvedFrame {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }

        let mut result = Vec::new();

        #[allow(clippy::cast_possible_truncation)]
        backtrace::resolve(addr as usize as *mut c_void, |symbol| {
            let function = symbol
                .name()
                .map(|name| match name.as_str() {
                    Some(raw) => Self::demangle_symbol(raw),
                    None => name.to_string(),
                })
                .unwrap_or_else(|| "<unknown>".to_string());

            let location = symbol.filename().map(|file| SourceLocation {
                file: Some(file.display().to_string()),
                line: symbol.lineno(),
            });

            result.push(InlinedFrame { function, location });
        });

        let resolved = ResolvedFrame {
            addr,
            frames: if result.is_empty() {
                vec![InlinedFrame { function: "<unknown>".to_string(), location: None }]
            } else {
                result
            },
        };

        self.cache.borrow_mut().insert(addr, resolved.clone());

        resolved
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

/// A resolved stack frame (may contain multiple inlined frames)
///
/// Frames are ordered innermost first: the last entry is the function the
/// address physically belongs to, earlier entries were inlined into it.
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub addr: u64,
    pub frames: Vec<InlinedFrame>,
}

/// An inlined frame within a resolved frame
#[derive(Debug, Clone)]
pub struct InlinedFrame {
    pub function: String,
    pub location: Option<SourceLocation>,
}

/// Source code location
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
}
