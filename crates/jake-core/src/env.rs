//! Variable environment
//!
//! Resolves `{{name}}` and `{{func(arg)}}` tokens. Lookup order, first hit
//! wins: loop bindings (innermost first), recipe parameters, process
//! environment, global variables. `$VAR` and `${VAR}` are left alone for the
//! shell.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error("undefined variable '{0}'")]
    Undefined(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unclosed '{{{{' at position {0}")]
    Unclosed(usize),
}

/// Layered variable scope for one recipe invocation
#[derive(Debug, Clone, Default)]
pub struct Scope {
    globals: BTreeMap<String, String>,
    env: HashMap<String, String>,
    params: HashMap<String, String>,
    bindings: Vec<(String, String)>,
    root: PathBuf,
}

impl Scope {
    pub fn new(
        globals: BTreeMap<String, String>,
        env: HashMap<String, String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            globals,
            env,
            params: HashMap::new(),
            bindings: Vec::new(),
            root: root.into(),
        }
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    /// Bind a loop variable; shadows everything until [`Scope::unbind`]
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.push((name.into(), value.into()));
    }

    pub fn unbind(&mut self) {
        self.bindings.pop();
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.params.get(name).map(String::as_str))
            .or_else(|| self.env.get(name).map(String::as_str))
            .or_else(|| self.globals.get(name).map(String::as_str))
    }

    /// Environment layer only, for `@require` and `env()` predicates
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expand every `{{...}}` token in `template`.
    ///
    /// Tokens whose body is neither an identifier nor a `func(arg)` call
    /// (e.g. `{{.State.Status}}` in a docker format string) are kept verbatim.
    pub fn expand(&self, template: &str) -> Result<String, ExpandError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or(ExpandError::Unclosed(offset + open))?;
            let body = after[..close].trim();

            match parse_token(body) {
                Some(Token::Var(name)) => {
                    let value = self
                        .lookup(name)
                        .ok_or_else(|| ExpandError::Undefined(name.to_string()))?;
                    out.push_str(value);
                }
                Some(Token::Call(func, arg)) => {
                    out.push_str(&self.call(func, arg)?);
                }
                None => out.push_str(&rest[open..open + 2 + close + 2]),
            }

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn call(&self, func: &str, arg: &str) -> Result<String, ExpandError> {
        let arg = self.resolve_arg(arg);
        let value = match func {
            "uppercase" => arg.to_uppercase(),
            "lowercase" => arg.to_lowercase(),
            "trim" => arg.trim().to_string(),
            "dirname" => Path::new(&arg)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "basename" => Path::new(&arg)
                .file_name()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "extension" => Path::new(&arg)
                .extension()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "without_extension" => Path::new(&arg)
                .with_extension("")
                .to_string_lossy()
                .into_owned(),
            "absolute_path" => {
                let path = Path::new(&arg);
                if path.is_absolute() {
                    arg.clone()
                } else {
                    self.root.join(path).to_string_lossy().into_owned()
                }
            }
            "home" => dirs::home_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "env" => self.env_var(&arg).unwrap_or_default().to_string(),
            other => return Err(ExpandError::UnknownFunction(other.to_string())),
        };
        Ok(value)
    }

    /// Quoted args are literals; bare args name a variable when one is defined, else are literal
    fn resolve_arg(&self, arg: &str) -> String {
        let arg = arg.trim();
        if let Some(inner) = strip_quotes(arg) {
            return inner.to_string();
        }
        self.lookup(arg).unwrap_or(arg).to_string()
    }
}

enum Token<'a> {
    Var(&'a str),
    Call(&'a str, &'a str),
}

fn parse_token(body: &str) -> Option<Token<'_>> {
    if is_identifier(body) {
        return Some(Token::Var(body));
    }
    let paren = body.find('(')?;
    let func = body[..paren].trim();
    let arg = body[paren + 1..].strip_suffix(')')?;
    is_identifier(func).then_some(Token::Call(func, arg))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn strip_quotes(s: &str) -> Option<&str> {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
}

/// Truthiness used by `env(VAR)` predicates
pub fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
