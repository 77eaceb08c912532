use std::fmt;

/// Abstract logic tree produced by the expression compiler.
///
/// Trees are immutable once built; rewrites go through [`Logic::rewrite`],
/// which allocates a new tree and leaves the original untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Logic {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    /// `@`, `@.a.b`, `@.^.a`: the current datum (or an enclosing one).
    Var(VarRef),
    /// `$`, `$.a.b`: the evaluation context.
    Context(Vec<String>),
    /// `@group`: key of the innermost enclosing split sub-stream.
    Group,
    /// `name(args...)`; operators compile to calls as well (`a + b` is `add(a, b)`).
    Call { name: String, args: Vec<Logic> },
}

/// Reference to the current datum. `ascend` counts leading `^` segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarRef {
    pub ascend: usize,
    pub path: Vec<String>,
}

impl Logic {
    pub fn call(name: impl Into<String>, args: Vec<Logic>) -> Self {
        Logic::Call {
            name: name.into(),
            args,
        }
    }

    pub fn var(path: &[&str]) -> Self {
        Logic::Var(VarRef {
            ascend: 0,
            path: path.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn context(path: &[&str]) -> Self {
        Logic::Context(path.iter().map(|s| s.to_string()).collect())
    }

    /// Top-down rewrite. `f` returns `Some(replacement)` to replace a node
    /// (its children are not visited) or `None` to keep it and descend.
    pub fn rewrite<E>(
        &self,
        f: &mut impl FnMut(&Logic) -> Result<Option<Logic>, E>,
    ) -> Result<Logic, E> {
        if let Some(replacement) = f(self)? {
            return Ok(replacement);
        }
        match self {
            Logic::Call { name, args } => Ok(Logic::Call {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| arg.rewrite(f))
                    .collect::<Result<_, _>>()?,
            }),
            leaf => Ok(leaf.clone()),
        }
    }

    /// True if any node in the tree satisfies `pred`.
    pub fn any(&self, pred: &impl Fn(&Logic) -> bool) -> bool {
        pred(self)
            || matches!(self, Logic::Call { args, .. } if args.iter().any(|a| a.any(pred)))
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logic::Number(n) => write_number(f, *n),
            Logic::Str(s) => write_string(f, s),
            Logic::Bool(b) => write!(f, "{b}"),
            Logic::Null => f.write_str("null"),
            Logic::Undefined => f.write_str("undefined"),
            Logic::Var(var) => {
                f.write_str("@")?;
                for _ in 0..var.ascend {
                    f.write_str(".^")?;
                }
                write_path(f, &var.path)
            }
            Logic::Context(path) => {
                f.write_str("$")?;
                write_path(f, path)
            }
            Logic::Group => f.write_str("@group"),
            Logic::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &[String]) -> fmt::Result {
    path.iter().try_for_each(|segment| write!(f, ".{segment}"))
}

// Numbers print in a form the grammar reads back; negative and non-finite
// values have no literal syntax and are spelled as calls.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("div(0,0)")
    } else if n == f64::INFINITY {
        f.write_str("Infinity")
    } else if n < 0.0 {
        f.write_str("sub(0,")?;
        write_number(f, -n)?;
        f.write_str(")")
    } else if n.fract() == 0.0 && n < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}
